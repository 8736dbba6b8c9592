use agfs_types::{ErrorKind, FileInfo, FsError, FsRequest, Payload, Reply, WriteFlag};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[test]
fn readdir_reply_parses_guest_json() {
    let json = r#"{"ok":[
        {"name":"a.txt","size":5,"mode":420,"mod_time":1700000000,"is_dir":false},
        {"name":"sub","mode":493,"is_dir":true,"meta":{"etag":"abc"}}
    ]}"#;
    let reply: Reply<Vec<FileInfo>> = serde_json::from_str(json).unwrap();
    let entries = reply.into_result().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], FileInfo::file("a.txt", 5, 0o644).with_mod_time(1_700_000_000));
    assert!(entries[1].is_dir);
    assert_eq!(entries[1].meta.as_ref().unwrap()["etag"], "abc");
}

#[test]
fn read_reply_decodes_payload() {
    let reply: Reply<Payload> = serde_json::from_str(r#"{"ok":"aGVsbG8="}"#).unwrap();
    assert_eq!(reply.into_result().unwrap().into_inner(), b"hello".to_vec());
}

#[test]
fn reply_without_ok_or_err_is_malformed() {
    assert!(serde_json::from_str::<Reply<u64>>(r#"{"value":1}"#).is_err());
    assert!(serde_json::from_str::<Reply<u64>>(r#"{"ok":"five"}"#).is_err());
}

#[test]
fn result_converts_to_reply() {
    let reply: Reply<()> = Err(FsError::unsupported("chmod")).into();
    let json = serde_json::to_string(&reply).unwrap();
    assert_eq!(json, r#"{"err":{"kind":"unsupported","message":"chmod"}}"#);
}

#[test]
fn rename_request_requires_destination() {
    let req = FsRequest::at("/old");
    assert_eq!(req.require_new_path().unwrap_err().kind, ErrorKind::InvalidArgument);
    let req = FsRequest::rename("/old", "/new");
    assert_eq!(req.require_new_path().unwrap(), "/new");
}

proptest! {
    #[test]
    fn write_request_carries_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 1..512)) {
        let req = FsRequest::write("/f", &data, 0, WriteFlag::CREATE);
        let json = serde_json::to_vec(&req).unwrap();
        let back: FsRequest = serde_json::from_slice(&json).unwrap();
        prop_assert_eq!(back.data.unwrap().into_inner(), data);
    }
}
