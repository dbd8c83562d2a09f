// Integration tests for the GCC / Clang controller
//
// A shell script stands in for the compiler: `-E` prints the input file,
// a compile writes "OBJ" followed by the input to the `-o` path, and any
// source containing FAIL is rejected with an error on stderr.
//
// Run with: cargo test -p kubecc-cc --test controller_test

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use kubecc_cc::CcController;
use kubecc_core::{
    CompileRequest, CompileResponse, CompileResult, Component, Contexts, RetryAction, RunRequest,
    ServerContext, Toolchain, ToolchainKind, UsageLimits,
};
use kubecc_run::{
    ClientError, ExecutorSet, QueuedExecutor, RequestError, SchedulerClient, ToolchainController,
    UnqueuedExecutor,
};
use tempfile::TempDir;

const FAKE_CC: &str = r##"#!/bin/sh
out=""; in=""; pp=0
while [ $# -gt 0 ]; do
  case "$1" in
    -E) pp=1 ;;
    -o) shift; out="$1" ;;
    *.c) in="$1" ;;
  esac
  shift
done
if grep -q FAIL "$in"; then echo "$in:1:1: error: FAIL found" >&2; exit 1; fi
if [ $pp = 1 ]; then echo "# 1 \"$in\""; cat "$in"; exit 0; fi
{ echo OBJ; cat "$in"; } > "$out"
"##;

fn fake_compiler() -> &'static Path {
    static DIR: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gcc");
        std::fs::write(&path, FAKE_CC).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    });
    path
}

fn toolchain() -> Toolchain {
    Toolchain::new(fake_compiler(), ToolchainKind::Gnu).with_pic_default(true)
}

fn contexts() -> Contexts {
    Contexts::for_request(&ServerContext::new(Component::Test))
}

fn controller() -> Arc<CcController> {
    let local = QueuedExecutor::new(UsageLimits::new(2));
    Arc::new(CcController::new(ExecutorSet::new(
        Arc::new(local),
        Arc::new(UnqueuedExecutor::new()),
    )))
}

fn run_request(work_dir: &Path, args: &[&str]) -> RunRequest {
    RunRequest {
        compiler: fake_compiler().to_path_buf(),
        args: args.iter().map(|a| a.to_string()).collect(),
        work_dir: work_dir.to_path_buf(),
        ..Default::default()
    }
}

/// Hands the request straight to the receive side of a controller
struct LoopbackClient {
    controller: Arc<CcController>,
}

#[async_trait]
impl SchedulerClient for LoopbackClient {
    async fn compile(
        &self,
        ctx: &Contexts,
        request: CompileRequest,
    ) -> Result<CompileResponse, ClientError> {
        let manager = self.controller.recv_remote(&request.toolchain);
        manager
            .process(ctx.clone(), request)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}

struct BusyClient;

#[async_trait]
impl SchedulerClient for BusyClient {
    async fn compile(
        &self,
        _ctx: &Contexts,
        request: CompileRequest,
    ) -> Result<CompileResponse, ClientError> {
        Ok(CompileResponse::retry(request.request_id, RetryAction::DoNotRetry))
    }
}

#[test_log::test(tokio::test)]
async fn test_run_local_writes_object() {
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join("x.c"), "int x;\n").unwrap();

    let controller = controller();
    let args = ["-O2", "-c", "x.c", "-o", "x.o"];
    let mut parser = controller.new_arg_parser(&args.map(String::from));
    parser.parse();
    let manager = controller.run_local(&toolchain(), parser);

    let response = manager
        .process(contexts(), run_request(work.path(), &args))
        .await
        .unwrap();
    assert_eq!(response.return_code, 0);
    let object = std::fs::read_to_string(work.path().join("x.o")).unwrap();
    assert_eq!(object, "OBJ\nint x;\n");
}

#[test_log::test(tokio::test)]
async fn test_run_local_compiler_error_is_response() {
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join("bad.c"), "FAIL\n").unwrap();

    let controller = controller();
    let args = ["-c", "bad.c"];
    let mut parser = controller.new_arg_parser(&args.map(String::from));
    parser.parse();
    let manager = controller.run_local(&toolchain(), parser);

    let response = manager
        .process(contexts(), run_request(work.path(), &args))
        .await
        .unwrap();
    assert_eq!(response.return_code, 1);
    assert!(String::from_utf8_lossy(&response.stderr).contains("error: FAIL found"));
}

#[test_log::test(tokio::test)]
async fn test_send_remote_round_trip() {
    let work = tempfile::tempdir().unwrap();
    std::fs::create_dir(work.path().join("src")).unwrap();
    std::fs::write(work.path().join("src/y.c"), "int y;\n").unwrap();

    let controller = controller();
    let args = ["-DFOO=1", "-I", "include", "-MD", "-c", "src/y.c", "-o", "y.o"];
    let mut parser = controller.new_arg_parser(&args.map(String::from));
    parser.parse();
    assert!(parser.can_run_remote());

    let client = Arc::new(LoopbackClient {
        controller: controller.clone(),
    });
    let manager = controller.send_remote(&toolchain(), parser, client);
    let response = manager
        .process(contexts(), run_request(work.path(), &args))
        .await
        .unwrap();
    assert_eq!(response.return_code, 0);

    let object = std::fs::read_to_string(work.path().join("y.o")).unwrap();
    assert_eq!(object, "OBJ\n# 1 \"src/y.c\"\nint y;\n");
}

#[test_log::test(tokio::test)]
async fn test_send_remote_preprocess_failure() {
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join("bad.c"), "FAIL\n").unwrap();

    let controller = controller();
    let args = ["-c", "bad.c", "-o", "bad.o"];
    let mut parser = controller.new_arg_parser(&args.map(String::from));
    parser.parse();
    let client = Arc::new(LoopbackClient {
        controller: controller.clone(),
    });
    let manager = controller.send_remote(&toolchain(), parser, client);

    let response = manager
        .process(contexts(), run_request(work.path(), &args))
        .await
        .unwrap();
    assert_eq!(response.return_code, 1);
    assert!(!work.path().join("bad.o").exists());
}

#[test_log::test(tokio::test)]
async fn test_send_remote_no_agents() {
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join("z.c"), "int z;\n").unwrap();

    let controller = controller();
    let args = ["-c", "z.c", "-o", "z.o"];
    let mut parser = controller.new_arg_parser(&args.map(String::from));
    parser.parse();
    let manager = controller.send_remote(&toolchain(), parser, Arc::new(BusyClient));

    let err = manager
        .process(contexts(), run_request(work.path(), &args))
        .await
        .unwrap_err();
    assert_eq!(err, RequestError::NoAgentsRunLocal);
}

#[test_log::test(tokio::test)]
async fn test_recv_remote() {
    let controller = controller();
    let manager = controller.recv_remote(&toolchain());
    let args: Vec<String> = ["-fPIC", "-c", "lib/w.c", "-o", "w.o"].map(String::from).to_vec();

    let ok = manager
        .process(
            contexts(),
            CompileRequest::new(toolchain(), args.clone(), b"int w;\n".to_vec()),
        )
        .await
        .unwrap();
    assert_eq!(ok.result, CompileResult::Success);
    assert_eq!(ok.compiled_source, b"OBJ\nint w;\n");

    let failed = manager
        .process(contexts(), CompileRequest::new(toolchain(), args, b"FAIL\n".to_vec()))
        .await
        .unwrap();
    assert_eq!(failed.result, CompileResult::Fail);
    assert!(failed.error.contains("error: FAIL found"));

    let no_input = manager
        .process(
            contexts(),
            CompileRequest::new(toolchain(), vec!["-c".into()], Vec::new()),
        )
        .await
        .unwrap();
    assert_eq!(no_input.result, CompileResult::InternalError);
}
