//! End-to-end cluster scenarios over real TCP listeners.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use chartpax::{
    ApiRequest, ChartpaxError, ClientCtrlStub, CtrlReactor, Dispatcher,
    DispatcherConfig, EditorSession, RejectReason, ReplicaId, ReplicaStatus,
};

fn test_config(base_dir: &Path) -> DispatcherConfig {
    DispatcherConfig {
        base_dir: base_dir.to_string_lossy().into_owned(),
        rpc_timeout_ms: 1000,
        learn_retries: 1,
        learn_backoff_ms: 10,
        channel_pool_size: 1,
        snapshot_interval_ms: 0,
    }
}

/// Dispatcher serving replica APIs on localhost, plus its control API on an
/// ephemeral port.
async fn start_cluster(
    base_dir: &Path,
    roster: Vec<ReplicaId>,
) -> Result<(Arc<Dispatcher>, CtrlReactor), ChartpaxError> {
    let dispatcher = Dispatcher::new_and_setup(
        test_config(base_dir),
        Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        roster,
    )
    .await?;
    let reactor =
        CtrlReactor::new_and_setup("127.0.0.1:0".parse()?, dispatcher.clone())
            .await?;
    Ok((dispatcher, reactor))
}

/// Registers and logs in `name` through a dispatcher-assigned replica.
async fn logged_in_session(
    ctrl_addr: SocketAddr,
    name: &str,
    password: &str,
) -> Result<EditorSession, ChartpaxError> {
    let mut session = EditorSession::new_by_assign(ctrl_addr, name).await?;
    let reply = session.register(password).await?;
    assert!(reply.is_success(), "{:?}", reply);
    let reply = session.login(password).await?;
    assert!(reply.is_success(), "{:?}", reply);
    Ok(session)
}

/// Content of a document section as stored by replica `id`.
async fn section_bytes(
    dispatcher: &Dispatcher,
    id: ReplicaId,
    document: &str,
    section: usize,
) -> Result<Vec<u8>, ChartpaxError> {
    let replica = dispatcher
        .replica(id)
        .ok_or_else(|| ChartpaxError::msg(format!("replica {} dead", id)))?;
    let doc = replica
        .documents()
        .get(document)
        .ok_or_else(|| ChartpaxError::msg("no such document"))?;
    let path = doc
        .section(section)
        .ok_or_else(|| ChartpaxError::msg("no such section"))?
        .path()
        .to_path_buf();
    Ok(tokio::fs::read(path).await?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn alice_bob_edit_chart() -> Result<(), ChartpaxError> {
    let dir = tempfile::tempdir()?;
    let roster = vec![47101, 47102, 47103];
    let (dispatcher, reactor) = start_cluster(dir.path(), roster.clone()).await?;

    let mut alice =
        logged_in_session(reactor.local_addr(), "alice", "pw1").await?;
    assert_eq!(alice.server(), 47101);
    assert!(alice.token().is_some_and(|t| !t.is_empty()));
    assert!(alice.create_document("chart1", 2).await?.is_success());

    let begin = alice.begin_edit("chart1", 0).await?;
    assert!(begin.is_success());
    assert_eq!(begin.message, "233.0.0.1");
    assert_eq!(begin.content, Some(Bytes::new()));

    // bob talks to another replica directly
    let bob_addr = dispatcher
        .api_addr(47102)
        .ok_or_else(|| ChartpaxError::msg("replica 47102 not serving"))?;
    let mut bob = EditorSession::new_by_connect(47102, bob_addr, "bob").await?;
    assert!(bob.register("pw2").await?.is_success());
    assert!(bob.login("pw2").await?.is_success());

    let denied = bob.begin_edit("chart1", 0).await?;
    assert_eq!(denied.reason, Some(RejectReason::PermissionDenied));
    assert!(alice.share_document("chart1", "bob").await?.is_success());

    let busy = bob.begin_edit("chart1", 0).await?;
    assert_eq!(busy.reason, Some(RejectReason::AlreadyOccupied));
    assert_eq!(busy.message, "The section is being edited");

    let end = alice
        .end_edit("chart1", 0, Bytes::from_static(b"vitals: ok"))
        .await?;
    assert!(end.is_success());

    let begin = bob.begin_edit("chart1", 0).await?;
    assert!(begin.is_success());
    assert_eq!(begin.content, Some(Bytes::from_static(b"vitals: ok")));
    assert!(bob
        .end_edit("chart1", 0, Bytes::from_static(b"vitals: ok; bp 120/80"))
        .await?
        .is_success());

    for &id in &roster {
        assert_eq!(
            section_bytes(&dispatcher, id, "chart1", 0).await?,
            b"vitals: ok; bp 120/80"
        );
        let replica = dispatcher
            .replica(id)
            .ok_or_else(|| ChartpaxError::msg("replica dead"))?;
        assert!(replica.channels().get("chart1").is_none());
    }

    let list = bob.list_documents().await?;
    assert_eq!(list.message, "chart1");
    assert!(alice.logout().await?.is_success());
    alice.leave().await?;
    bob.leave().await?;

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn share_then_fetch_notifications() -> Result<(), ChartpaxError> {
    let dir = tempfile::tempdir()?;
    let (dispatcher, reactor) =
        start_cluster(dir.path(), vec![47111, 47112, 47113]).await?;

    let mut alice =
        logged_in_session(reactor.local_addr(), "alice", "pw1").await?;
    let mut bob = logged_in_session(reactor.local_addr(), "bob", "pw2").await?;
    assert!(alice.create_document("chart1", 1).await?.is_success());
    assert!(alice.share_document("chart1", "bob").await?.is_success());

    let first = bob.fetch_notifications().await?;
    assert!(first.is_success());
    assert_eq!(first.notifications, vec!["chart1".to_string()]);

    let second = bob.fetch_notifications().await?;
    assert!(second.is_success());
    assert_eq!(second.message, "None");
    assert!(second.notifications.is_empty());

    // the drain reached every replica
    for id in [47111, 47112, 47113] {
        let replica = dispatcher
            .replica(id)
            .ok_or_else(|| ChartpaxError::msg("replica dead"))?;
        let account = replica
            .accounts()
            .get("bob")
            .ok_or_else(|| ChartpaxError::msg("no bob"))?;
        assert!(account.notifications().is_empty());
    }

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_document_names() -> Result<(), ChartpaxError> {
    let dir = tempfile::tempdir()?;
    let roster = vec![47121, 47122, 47123];
    let (dispatcher, reactor) = start_cluster(dir.path(), roster.clone()).await?;

    let mut alice =
        logged_in_session(reactor.local_addr(), "alice", "pw1").await?;
    assert!(alice.create_document("chart1", 1).await?.is_success());
    let again = alice.create_document("chart1", 1).await?;
    assert_eq!(again.reason, Some(RejectReason::AlreadyExists));

    // racing creates on different replicas both pass the name check; at
    // least one wins and no replica ends up with two documents of a name
    let mut bob = logged_in_session(reactor.local_addr(), "bob", "pw2").await?;
    let carol_addr = dispatcher
        .api_addr(47123)
        .ok_or_else(|| ChartpaxError::msg("replica 47123 not serving"))?;
    let mut carol =
        EditorSession::new_by_connect(47123, carol_addr, "carol").await?;
    assert!(carol.register("pw3").await?.is_success());
    assert!(carol.login("pw3").await?.is_success());

    let (b, c) = tokio::join!(
        bob.create_document("chart2", 1),
        carol.create_document("chart2", 1)
    );
    let (b, c) = (b?, c?);
    assert!(b.is_success() || c.is_success() || {
        // both votes may abort against each other
        b.message == "Request aborted." && c.message == "Request aborted."
    });
    for &id in &roster {
        let replica = dispatcher
            .replica(id)
            .ok_or_else(|| ChartpaxError::msg("replica dead"))?;
        let chart2s = replica
            .documents()
            .all()
            .iter()
            .filter(|d| d.name() == "chart2")
            .count();
        assert!(chart2s <= 1);
    }

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kill_and_restart_via_control() -> Result<(), ChartpaxError> {
    let dir = tempfile::tempdir()?;
    let (dispatcher, reactor) =
        start_cluster(dir.path(), vec![47131, 47132, 47133]).await?;
    let mut ctrl = ClientCtrlStub::new_by_connect(reactor.local_addr()).await?;

    let mut alice =
        logged_in_session(reactor.local_addr(), "alice", "pw1").await?;
    assert_eq!(alice.server(), 47131);
    alice.leave().await?;

    ctrl.kill(47131).await?;
    ctrl.kill(47131).await?;
    assert!(ctrl.kill(47999).await.is_err());
    assert_eq!(
        ctrl.statuses().await?,
        vec![
            (47131, ReplicaStatus::Dead),
            (47132, ReplicaStatus::EmptyLive),
            (47133, ReplicaStatus::EmptyLive),
        ]
    );
    assert!(ctrl.restart(47132).await.is_err());

    // changes made while 47131 is down
    let mut bob = logged_in_session(reactor.local_addr(), "bob", "pw2").await?;
    assert_eq!(bob.server(), 47132);
    assert!(bob.create_document("chart1", 2).await?.is_success());
    assert!(bob.begin_edit("chart1", 1).await?.is_success());
    assert!(bob
        .end_edit("chart1", 1, Bytes::from_static(b"allergies: none"))
        .await?
        .is_success());

    assert!(ctrl.restart(47131).await?);
    assert_eq!(dispatcher.status(47131)?, ReplicaStatus::EmptyLive);
    let recovered = dispatcher
        .replica(47131)
        .ok_or_else(|| ChartpaxError::msg("replica 47131 not back"))?;
    assert!(recovered.accounts().contains("bob"));
    assert!(recovered
        .documents()
        .get("chart1")
        .is_some_and(|d| d.section(1).is_some_and(|s| s
            .path()
            .starts_with(recovered.data_root()))));
    assert_eq!(
        section_bytes(&dispatcher, 47131, "chart1", 1).await?,
        b"allergies: none"
    );

    // the recovered replica serves clients again; the session table came
    // along, so a second login is refused
    let addr = dispatcher
        .api_addr(47131)
        .ok_or_else(|| ChartpaxError::msg("replica 47131 not serving"))?;
    let mut stub = chartpax::ClientApiStub::new_by_connect(addr).await?;
    let relogin = stub
        .call(&ApiRequest::Login {
            name: "bob".into(),
            password: "pw2".into(),
        })
        .await?;
    assert_eq!(relogin.reason, Some(RejectReason::AlreadyLoggedIn));
    stub.leave().await?;

    ctrl.set_status(47131, ReplicaStatus::Busy).await?;
    assert_eq!(
        EditorSession::new_by_assign(reactor.local_addr(), "dave")
            .await?
            .server(),
        47132
    );
    ctrl.leave().await?;

    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn artifacts_survive_shutdown() -> Result<(), ChartpaxError> {
    let dir = tempfile::tempdir()?;
    let roster = vec![1, 2];

    let dispatcher =
        Dispatcher::new_and_setup(test_config(dir.path()), None, roster.clone())
            .await?;
    let replica = dispatcher
        .replica(1)
        .ok_or_else(|| ChartpaxError::msg("replica 1 dead"))?;
    let reply = replica
        .handle_request(ApiRequest::Register {
            name: "alice".into(),
            password: "pw1".into(),
        })
        .await;
    assert!(reply.is_success());
    let token = replica
        .handle_request(ApiRequest::Login {
            name: "alice".into(),
            password: "pw1".into(),
        })
        .await
        .message;
    let reply = replica
        .handle_request(ApiRequest::CreateDocument {
            name: "alice".into(),
            token,
            document: "chart1".into(),
            sections: 3,
        })
        .await;
    assert!(reply.is_success());
    drop(replica);
    dispatcher.shutdown().await;
    drop(dispatcher);

    let dispatcher =
        Dispatcher::new_and_setup(test_config(dir.path()), None, roster)
            .await?;
    for id in [1, 2] {
        let replica = dispatcher
            .replica(id)
            .ok_or_else(|| ChartpaxError::msg("replica dead"))?;
        assert!(replica.accounts().contains("alice"));
        let doc = replica
            .documents()
            .get("chart1")
            .ok_or_else(|| ChartpaxError::msg("no chart1"))?;
        assert_eq!(doc.sections().len(), 3);
        // sessions are not persisted
        assert!(!replica.sessions().is_logged_in("alice"));
    }
    Ok(())
}
