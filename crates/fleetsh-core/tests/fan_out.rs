mod common;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleetsh_core::*;
use fleetsh_exec::keys::KeySource;
use tokio::sync::Barrier;

use common::{MockTransport, init_tracing};

fn member(transport: &Arc<MockTransport>) -> Connection {
    Connection::with_transport(
        transport.name.clone(),
        transport.clone(),
        &ConnectionOptions::default(),
    )
}

fn group_of(name: &str, transports: &[Arc<MockTransport>], parallel: bool) -> HostGroup {
    let mut group = HostGroup::new(name, ConnectionOptions::default());
    group.set_parallel(parallel);
    for t in transports {
        group.add_connection(member(t));
    }
    group
}

#[tokio::test]
async fn test_parallel_keeps_member_order() {
    init_tracing();

    let finished = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(3));
    let transports: Vec<Arc<MockTransport>> = [("slow", 300), ("medium", 150), ("fast", 10)]
        .into_iter()
        .map(|(name, ms)| {
            Arc::new(
                MockTransport::named(name)
                    .with_delay(Duration::from_millis(ms))
                    .with_barrier(barrier.clone())
                    .recording_completion(finished.clone()),
            )
        })
        .collect();
    let group = group_of("web", &transports, true);

    // Every member waits on the barrier, so this only finishes if all run at once
    let result = tokio::time::timeout(Duration::from_secs(5), group.execute("hostname", &[]))
        .await
        .expect("members did not run concurrently")
        .unwrap();

    assert_eq!(result.len(), 3);
    let names: Vec<String> = result.iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["slow", "medium", "fast"]);
    assert_eq!(*finished.lock().unwrap(), vec!["fast", "medium", "slow"]);

    assert!(result.producer().is_group());
    assert_eq!(result.producer().name(), "web");
    let hosts: Vec<&str> = result.iter().map(|r| r.producer().name()).collect();
    assert_eq!(hosts, vec!["slow", "medium", "fast"]);
}

#[tokio::test]
async fn test_sequential_runs_in_order() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let transports: Vec<Arc<MockTransport>> = [("a", 50), ("b", 0), ("c", 20)]
        .into_iter()
        .map(|(name, ms)| {
            Arc::new(
                MockTransport::named(name)
                    .with_delay(Duration::from_millis(ms))
                    .recording_completion(finished.clone()),
            )
        })
        .collect();
    let group = group_of("all", &transports, false);

    let result = group.execute("uptime", &[]).await.unwrap();

    assert_eq!(*finished.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(result, "a\nb\nc");
    assert!(result.is_success());
}

#[tokio::test]
async fn test_member_failure_is_isolated_and_attributed() {
    for parallel in [false, true] {
        let transports = vec![
            Arc::new(MockTransport::named("ok-1")),
            Arc::new(MockTransport::named("bad").failing(2, "ls: cannot access 'x'\n")),
            Arc::new(MockTransport::named("ok-2")),
        ];
        let group = group_of("mixed", &transports, parallel);

        let result = group.execute("ls", &["x".into()]).await.unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.get(0).unwrap(), "ok-1");
        assert_eq!(result.get(2).unwrap(), "ok-2");
        assert!(!result.is_success());
        assert_eq!(result.exit_code(), 2);

        let failed = result.get(1).unwrap();
        assert_eq!(failed.producer().name(), "bad");
        let err = failed.error().unwrap().as_command().unwrap();
        assert_eq!(err.exit_code, 2);
        assert_eq!(err.host, "bad");
        assert_eq!(err.command, "ls x");
        assert!(err.stderr.contains("cannot access"));

        let errors = result.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0.name(), "bad");

        // every member ran
        assert!(transports.iter().all(|t| t.scripts().len() == 1));
    }
}

#[tokio::test]
async fn test_broadcast_state_reaches_every_member() {
    let transports = vec![
        Arc::new(MockTransport::named("a")),
        Arc::new(MockTransport::named("b")),
    ];
    let mut group = group_of("all", &transports, true);
    group.cd("/var/log");
    group.set_environment_variable("LANG", "C").unwrap();

    group.execute("ls", &[Arg::flag("l")]).await.unwrap();

    for t in &transports {
        assert_eq!(t.scripts(), vec!["cd /var/log && export LANG=C && ls -l"]);
    }
}

#[tokio::test]
async fn test_keys_propagate_to_current_and_future_members() {
    let first = Arc::new(MockTransport::named("first"));
    let second = Arc::new(MockTransport::named("second"));

    let mut group = HostGroup::new("keys", ConnectionOptions::default());
    group.add_connection(member(&first));
    group.add_private_keys(["/keys/deploy"]);
    group.add_connections([member(&second)]).unwrap();

    let expected = vec![KeySource::Path(PathBuf::from("/keys/deploy"))];
    assert_eq!(first.keys(), expected);
    assert_eq!(second.keys(), expected);
}

#[tokio::test]
async fn test_empty_group_returns_empty_aggregate() {
    let group = HostGroup::new("nobody", ConnectionOptions::default());
    let result = group.execute("uptime", &[]).await.unwrap();
    assert!(result.is_empty());
    assert_eq!(result, "");
}

struct WhereAmI;

#[async_trait]
impl CommandHandler for WhereAmI {
    async fn invoke(&self, conn: &Connection, _args: &[Arg]) -> Result<ResultAggregate, CoreError> {
        conn.run_program("pwd", &[]).await
    }
}

#[tokio::test]
async fn test_custom_handler_sees_member_state() {
    CommandRegistry::global().register("fleetsh_test_whereami", Arc::new(WhereAmI));

    let transports = vec![
        Arc::new(MockTransport::named("a")),
        Arc::new(MockTransport::named("b")),
    ];
    let mut group = group_of("all", &transports, false);
    group.cd("/srv");

    let result = group.execute("fleetsh_test_whereami", &[]).await.unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(transports[0].scripts(), vec!["cd /srv && pwd"]);
    assert_eq!(transports[1].scripts(), vec!["cd /srv && pwd"]);
}

#[tokio::test]
async fn test_timeout_surfaces_as_transport_error() {
    let transport = Arc::new(MockTransport::named("hang").with_delay(Duration::from_secs(5)));
    let options = ConnectionOptions {
        timeout_secs: Some(1),
        ..ConnectionOptions::default()
    };
    let conn = Connection::with_transport("hang", transport, &options);

    let err = conn.execute("sleep", &["5".into()]).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Transport(fleetsh_exec::ExecError::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_in_memory_transfer_round_trip() {
    let transport = Arc::new(MockTransport::named("files"));
    let conn = member(&transport).change_directory("/srv/app");

    let written = conn
        .upload(&[TransferSource::memory("config.json", b"{\"a\":1}".to_vec())], "releases")
        .await
        .unwrap();
    assert_eq!(written, vec!["/srv/app/releases/config.json"]);

    let mut sink = TransferSink::memory();
    let n = conn.download("releases/config.json", &mut sink).await.unwrap();
    assert_eq!(n, 7);
    assert_eq!(sink.bytes(), Some(&b"{\"a\":1}"[..]));
}

#[tokio::test]
async fn test_transfer_expands_home_directory() {
    // the double prints its name for every script, including the home lookup
    let transport = Arc::new(MockTransport::named("/home/deploy"));
    let mut conn = member(&transport);

    let written = conn
        .upload(&[TransferSource::memory("app.tar", b"tar".to_vec())], "~/releases")
        .await
        .unwrap();
    assert_eq!(written, vec!["/home/deploy/releases/app.tar"]);

    conn.cd("~");
    let mut sink = TransferSink::memory();
    conn.download("releases/app.tar", &mut sink).await.unwrap();
    assert_eq!(sink.bytes(), Some(&b"tar"[..]));

    assert!(transport.scripts().iter().all(|s| s == "printf '%s' ~"));
}
