//! Sandboxed providers mounted through the router.

use agfs_mount::{MountRouter, ProviderKind, ProviderSpec, RouterConfig};
use agfs_plugin_host::{
    Capability, CapabilitySet, HttpClient, InstanceState, PluginHost, PluginSpec, PolicyEngine,
};
use agfs_types::abi::pack_i64;
use agfs_types::{ErrorKind, FsResult, HttpRequest, HttpResponse, MountConfig, Payload};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Builds a WAT guest whose exports answer fixed JSON documents.
struct Guest {
    data: Vec<(u32, String)>,
    funcs: Vec<String>,
    next: u32,
}

impl Guest {
    fn new(name: &str) -> Self {
        Self {
            data: Vec::new(),
            funcs: Vec::new(),
            next: 1024,
        }
        .reply("agfs_name", &format!(r#"{{"ok":"{name}"}}"#))
    }

    fn place(&mut self, body: &str) -> (u32, u32) {
        let offset = self.next;
        let len = body.len() as u32;
        self.data.push((offset, body.to_string()));
        self.next += (len + 16) & !7;
        (offset, len)
    }

    fn reply(mut self, export: &str, body: &str) -> Self {
        let (offset, len) = self.place(body);
        self.funcs.push(format!(
            "(func (export \"{export}\") (param i32 i32) (result i64) i64.const {})",
            pack_i64(offset, len)
        ));
        self
    }

    fn forward_http(mut self, export: &str, request: &str) -> Self {
        let (offset, len) = self.place(request);
        self.funcs.push(format!(
            "(func (export \"{export}\") (param i32 i32) (result i64) (call $host_http (i32.const {offset}) (i32.const {len})))"
        ));
        self
    }

    fn wat(&self) -> Vec<u8> {
        let mut wat = String::from(
            r#"(module
  (import "env" "host_http" (func $host_http (param i32 i32) (result i64)))
  (memory (export "memory") 2)
  (global $bump (mut i32) (i32.const 65536))
  (func (export "agfs_alloc") (param $size i32) (result i32)
    (local $p i32)
    (local.set $p (global.get $bump))
    (global.set $bump (i32.add (global.get $bump) (local.get $size)))
    (local.get $p))
"#,
        );
        for (offset, body) in &self.data {
            let escaped = body.replace('\\', "\\5c").replace('"', "\\22");
            wat.push_str(&format!("  (data (i32.const {offset}) \"{escaped}\")\n"));
        }
        for func in &self.funcs {
            wat.push_str(&format!("  {func}\n"));
        }
        wat.push(')');
        wat.into_bytes()
    }
}

#[derive(Default)]
struct RecordingHttp {
    calls: Mutex<Vec<HttpRequest>>,
}

impl HttpClient for RecordingHttp {
    fn execute(&self, request: &HttpRequest, _timeout: Duration) -> FsResult<HttpResponse> {
        self.calls.lock().push(request.clone());
        Ok(HttpResponse {
            status_code: 200,
            headers: BTreeMap::new(),
            body: Payload(b"ok".to_vec()),
        })
    }
}

/// Answers every request after `delay`, holding the guest call open.
struct SlowHttp {
    delay: Duration,
    calls: AtomicUsize,
}

impl HttpClient for SlowHttp {
    fn execute(&self, _request: &HttpRequest, _timeout: Duration) -> FsResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(HttpResponse {
            status_code: 200,
            headers: BTreeMap::new(),
            body: Payload(Vec::new()),
        })
    }
}

fn router_with(http: Arc<dyn HttpClient>) -> MountRouter {
    router_with_config(http, RouterConfig::default())
}

fn router_with_config(http: Arc<dyn HttpClient>, config: RouterConfig) -> MountRouter {
    let host = PluginHost::with_policy(PolicyEngine::unrestricted())
        .unwrap()
        .with_http_client(http);
    MountRouter::new(config).with_plugin_host(Arc::new(host))
}

fn router() -> MountRouter {
    router_with(Arc::new(RecordingHttp::default()))
}

fn plugin(guest: &Guest) -> ProviderSpec {
    ProviderSpec::Plugin(PluginSpec::from_bytes(guest.wat()))
}

#[tokio::test]
async fn plugin_serves_through_the_router() {
    let router = router();
    let guest = Guest::new("hellofs")
        .reply("fs_read", r#"{"ok":"aGVsbG8="}"#)
        .reply(
            "fs_stat",
            r#"{"ok":{"name":"hello","size":5,"mode":420,"mod_time":0,"is_dir":false}}"#,
        );
    router.mount("/hello", plugin(&guest), MountConfig::new()).await.unwrap();

    assert_eq!(router.read("/hello/hello", 0, -1).await.unwrap(), b"hello");
    assert_eq!(router.stat("/hello/hello").await.unwrap().size, 5);

    let mounts = router.mounts();
    assert_eq!(mounts[0].provider, "hellofs");
    assert_eq!(mounts[0].kind, ProviderKind::Sandboxed);
}

#[tokio::test]
async fn malformed_guest_response_is_contained() {
    let router = router();
    let guest = Guest::new("brokenfs")
        .reply("fs_stat", "this is not json")
        .reply("fs_read", r#"{"ok":"b2s="}"#);
    router.mount("/broken", plugin(&guest), MountConfig::new()).await.unwrap();
    router.mount("/mem", ProviderSpec::native("memfs"), MountConfig::new()).await.unwrap();

    let err = router.stat("/broken/x").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);

    router.write("/mem/a.txt", b"still fine").await.unwrap();
    assert_eq!(router.read("/mem/a.txt", 0, -1).await.unwrap(), b"still fine");
    assert_eq!(router.read("/broken/x", 0, -1).await.unwrap(), b"ok");
}

#[tokio::test]
async fn missing_guest_export_is_unsupported() {
    let router = router();
    router.mount("/bare", plugin(&Guest::new("barefs")), MountConfig::new()).await.unwrap();
    let err = router.write("/bare/f", b"x").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unsupported);
}

#[tokio::test]
async fn init_error_aborts_plugin_mount() {
    let router = router();
    let guest = Guest::new("cfgfs").reply(
        "agfs_init",
        r#"{"err":{"kind":"invalid_argument","message":"bucket is required"}}"#,
    );
    let err = router.mount("/cfg", plugin(&guest), MountConfig::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert!(err.message.contains("bucket is required"));
    assert!(router.mounts().is_empty());
}

#[tokio::test]
async fn invalid_module_fails_the_mount() {
    let router = router();
    let spec = ProviderSpec::Plugin(PluginSpec::from_bytes(b"not wasm".to_vec()));
    let err = router.mount("/bad", spec, MountConfig::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
    assert!(router.mounts().is_empty());
}

#[tokio::test]
async fn unmount_unloads_plugin_instances() {
    let router = router();
    let guest = Guest::new("poolfs").reply("fs_read", r#"{"ok":""}"#);
    router
        .mount(
            "/pool",
            ProviderSpec::Plugin(PluginSpec::from_bytes(guest.wat()).with_instances(2)),
            MountConfig::new(),
        )
        .await
        .unwrap();

    let (handle, _) = router.resolve("/pool/x").unwrap();
    let sandboxed = handle.as_sandboxed().unwrap().clone();
    assert_eq!(sandboxed.instance_states(), vec![InstanceState::Ready, InstanceState::Ready]);

    router.unmount("/pool").await.unwrap();
    assert_eq!(
        sandboxed.instance_states(),
        vec![InstanceState::Unloaded, InstanceState::Unloaded]
    );
    assert_eq!(router.resolve("/pool/x").unwrap_err().kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn http_gate_is_per_mount() {
    let http = Arc::new(RecordingHttp::default());
    let router = router_with(http.clone());
    let request = r#"{"method":"GET","url":"http://example.invalid/"}"#;
    let guest = Guest::new("webfs").forward_http("fs_read", request);

    router.mount("/denied", plugin(&guest), MountConfig::new()).await.unwrap();
    let err = router.read("/denied/page", 0, -1).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::PermissionDenied);
    assert_eq!(http.calls.lock().len(), 0);

    let granted = PluginSpec::from_bytes(guest.wat())
        .with_capabilities(CapabilitySet::from_iter([Capability::HostHttp]));
    router
        .mount("/granted", ProviderSpec::Plugin(granted), MountConfig::new())
        .await
        .unwrap();
    // The forwarded host reply is an HTTP response object, not a payload.
    let err = router.read("/granted/page", 0, -1).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Internal);
    assert_eq!(http.calls.lock().len(), 1);
    assert_eq!(router.read("/denied/page", 0, -1).await.unwrap_err().kind, ErrorKind::PermissionDenied);
    assert_eq!(http.calls.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unmount_does_not_wait_past_grace_for_a_busy_guest() {
    let http = Arc::new(SlowHttp {
        delay: Duration::from_secs(2),
        calls: AtomicUsize::new(0),
    });
    let router = Arc::new(router_with_config(
        http.clone(),
        RouterConfig {
            unmount_grace: Duration::from_millis(200),
        },
    ));
    let request = r#"{"method":"GET","url":"http://example.invalid/slow"}"#;
    let guest = Guest::new("slowwebfs").forward_http("fs_read", request);
    let spec = PluginSpec::from_bytes(guest.wat())
        .with_capabilities(CapabilitySet::from_iter([Capability::HostHttp]));
    router.mount("/slow", ProviderSpec::Plugin(spec), MountConfig::new()).await.unwrap();

    let (handle, _) = router.resolve("/slow/page").unwrap();
    let sandboxed = handle.as_sandboxed().unwrap().clone();
    drop(handle);

    let reader = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.read("/slow/page", 0, -1).await })
    };
    while http.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let start = Instant::now();
    router.unmount("/slow").await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(1), "unmount took {:?}", start.elapsed());
    assert_eq!(sandboxed.instance_states(), vec![InstanceState::Unloaded]);
    assert_eq!(router.resolve("/slow/page").unwrap_err().kind, ErrorKind::NotFound);

    // The abandoned call still runs to completion; the instance stays unloaded.
    let _ = reader.await.unwrap();
    assert_eq!(sandboxed.instance_states(), vec![InstanceState::Unloaded]);
    assert_eq!(http.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn router_debug_lists_mounts() {
    let router = router();
    router.mount("/mem", ProviderSpec::native("memfs"), MountConfig::new()).await.unwrap();
    let text = format!("{router:?}");
    assert!(text.contains("/mem"), "{text}");
    assert!(text.contains("plugins: true"), "{text}");
}
