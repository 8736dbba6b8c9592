//! Test guests written as WebAssembly text.
//!
//! `GuestBuilder` lays canned JSON replies out in data segments below the
//! heap and emits exports that return their packed location. The bump
//! allocator hands out memory from 64 KiB upward and wraps before the end of
//! the second page.

#![allow(dead_code)]

use agfs_types::abi::pack_i64;
use agfs_types::{FsError, FsResult, HttpRequest, HttpResponse, Payload};
use agfs_plugin_host::HttpClient;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

pub const HEAP_START: u32 = 65536;
pub const MEMORY_END: u32 = 2 * 65536;

pub struct GuestBuilder {
    data: Vec<(u32, Vec<u8>)>,
    funcs: Vec<String>,
    next: u32,
}

impl GuestBuilder {
    /// A guest whose `agfs_name` answers `name`.
    pub fn new(name: &str) -> Self {
        Self::nameless().reply("agfs_name", &format!(r#"{{"ok":"{name}"}}"#))
    }

    /// A guest without `agfs_name`.
    pub fn nameless() -> Self {
        Self {
            data: Vec::new(),
            funcs: Vec::new(),
            next: 1024,
        }
    }

    fn place(&mut self, bytes: &[u8]) -> (u32, u32) {
        let offset = self.next;
        let len = bytes.len() as u32;
        self.data.push((offset, bytes.to_vec()));
        self.next += (len + 16) & !7;
        assert!(self.next < HEAP_START, "test guest data overflows into the heap");
        (offset, len)
    }

    /// `export` always returns `body` verbatim.
    pub fn reply(mut self, export: &str, body: &str) -> Self {
        let (offset, len) = self.place(body.as_bytes());
        self.raw(export, &format!("i64.const {}", pack_i64(offset, len)))
    }

    /// `export` runs the given instructions, which must leave an i64.
    pub fn raw(mut self, export: &str, body: &str) -> Self {
        self.funcs.push(format!(
            "(func (export \"{export}\") (param $ptr i32) (param $len i32) (result i64)\n  {body})"
        ));
        self
    }

    /// `export` calls the host import with a fixed request and returns the
    /// host's reply unchanged.
    pub fn forward(mut self, export: &str, import: &str, request: &str) -> Self {
        let (offset, len) = self.place(request.as_bytes());
        self.raw(
            export,
            &format!("(call ${import} (i32.const {offset}) (i32.const {len}))"),
        )
    }

    /// Like `forward`, but when the host reply starts with `{"ok"` the export
    /// answers `ok_reply` instead.
    pub fn on_host_ok(mut self, export: &str, import: &str, request: &str, ok_reply: &str) -> Self {
        let (req_off, req_len) = self.place(request.as_bytes());
        let (ok_off, ok_len) = self.place(ok_reply.as_bytes());
        self.funcs.push(format!(
            r#"(func (export "{export}") (param $ptr i32) (param $len i32) (result i64)
  (local $r i64)
  (local.set $r (call ${import} (i32.const {req_off}) (i32.const {req_len})))
  (if (result i64)
    (i32.eq (i32.load8_u offset=2 (i32.wrap_i64 (local.get $r))) (i32.const 111))
    (then (i64.const {ok}))
    (else (local.get $r))))"#,
            ok = pack_i64(ok_off, ok_len)
        ));
        self
    }

    pub fn build(&self) -> String {
        let mut wat = String::from(
            r#"(module
  (import "env" "host_fs" (func $host_fs (param i32 i32) (result i64)))
  (import "env" "host_http" (func $host_http (param i32 i32) (result i64)))
  (memory (export "memory") 2)
  (global $bump (mut i32) (i32.const 65536))
  (func (export "agfs_alloc") (param $size i32) (result i32)
    (local $p i32)
    (if (i32.gt_u (i32.add (global.get $bump) (local.get $size)) (i32.const 131072))
      (then (global.set $bump (i32.const 65536))))
    (local.set $p (global.get $bump))
    (global.set $bump (i32.add (global.get $bump) (local.get $size)))
    (local.get $p))
  (func (export "agfs_free") (param i32 i32))
"#,
        );
        for (offset, bytes) in &self.data {
            wat.push_str(&format!("  (data (i32.const {offset}) \"{}\")\n", escape(bytes)));
        }
        for func in &self.funcs {
            wat.push_str("  ");
            wat.push_str(func);
            wat.push('\n');
        }
        wat.push(')');
        wat
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.build().into_bytes()
    }
}

fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'"' | b'\\' => out.push_str(&format!("\\{b:02x}")),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{b:02x}")),
        }
    }
    out
}

/// Records every request and answers `200 pong`, or `failure` when set.
#[derive(Default)]
pub struct MockHttp {
    pub calls: Mutex<Vec<(HttpRequest, Duration)>>,
    pub failure: Option<FsError>,
}

impl MockHttp {
    pub fn failing(failure: FsError) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failure: Some(failure),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl HttpClient for MockHttp {
    fn execute(&self, request: &HttpRequest, timeout: Duration) -> FsResult<HttpResponse> {
        self.calls.lock().push((request.clone(), timeout));
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(HttpResponse {
            status_code: 200,
            headers: BTreeMap::new(),
            body: Payload(b"pong".to_vec()),
        })
    }
}
