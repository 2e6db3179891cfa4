mod common;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{Fixture, advertise, commit, pack_for, receive, ref_names, ref_value, upstream};
use std::sync::Arc;
use std::sync::mpsc;
use vox_remote::connection::PushReport;
use vox_remote::connection::http::{PackfileRequest, PackfileResponse, PushRequest, RefInfo};
use vox_remote::storage::{ObjectStore, RefStore};
use vox_remote::{AutotagOption, Direction, PushOutcome, Remote, Repository};

async fn list_refs(State(repo): State<Arc<Repository>>) -> Json<Vec<RefInfo>> {
    Json(
        advertise(&repo)
            .refs()
            .map(|head| RefInfo {
                name: head.name.clone(),
                id: head.id,
                peeled: head.peeled,
            })
            .collect(),
    )
}

async fn packfile(
    State(repo): State<Arc<Repository>>,
    Json(request): Json<PackfileRequest>,
) -> Json<PackfileResponse> {
    Json(PackfileResponse {
        data: pack_for(&repo, &request.wants, &request.haves),
    })
}

async fn push(
    State(repo): State<Arc<Repository>>,
    Json(request): Json<PushRequest>,
) -> Json<PushReport> {
    Json(receive(&repo, &request.commands, request.pack.as_deref()))
}

/// Serves `fixture` under `/repo` and returns its base URL.
fn spawn_server(fixture: &Fixture) -> String {
    let repo = Arc::new(Repository::open(&fixture.path).expect("open served repository"));
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let app = Router::new()
                .route("/repo/api/v1/refs", get(list_refs))
                .route("/repo/api/v1/packfile", post(packfile))
                .route("/repo/api/v1/push", post(push))
                .with_state(repo);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            tx.send(listener.local_addr().expect("local addr"))
                .expect("report address");
            axum::serve(listener, app).await.expect("serve");
        });
    });

    let addr = rx.recv().expect("server address");
    format!("http://{addr}/repo")
}

#[test]
fn test_ls_over_http() {
    let fixture = upstream();
    let url = spawn_server(&fixture);
    let local = fixture.sibling("clone", false);

    let mut over_http = Remote::create_anonymous(&local, &url).unwrap();
    over_http.connect(Direction::Fetch).unwrap();
    let mut over_path = Remote::create_anonymous(&local, &fixture.url()).unwrap();
    over_path.connect(Direction::Fetch).unwrap();

    assert_eq!(over_http.ls().unwrap(), over_path.ls().unwrap());
    assert_eq!(
        over_http.ls().unwrap().get("refs/tags/hard_tag^{}").unwrap().id,
        fixture.hard
    );
}

#[test]
fn test_fetch_over_http() {
    let fixture = upstream();
    let url = spawn_server(&fixture);
    let local = fixture.sibling("clone", false);

    let mut remote = Remote::create_anonymous(&local, &url).unwrap();
    remote
        .add_fetch("+refs/heads/*:refs/remotes/origin/*")
        .unwrap();
    remote.set_autotag(AutotagOption::All);
    let report = remote.fetch().unwrap();

    assert_eq!(report.rejected().count(), 0);
    assert_eq!(
        ref_value(&local, "refs/remotes/origin/feature"),
        Some(fixture.feature)
    );
    assert_eq!(
        ref_names(&local, "refs/tags/"),
        vec!["refs/tags/hard_tag", "refs/tags/light", "refs/tags/test"]
    );
    assert_eq!(
        ref_value(&local, "refs/tags/hard_tag"),
        Some(fixture.hard_tag)
    );
    assert!(local.objects().has(&fixture.hard));
}

#[test]
fn test_push_over_http() {
    let fixture = upstream();
    let url = spawn_server(&fixture);
    let local = fixture.sibling("work", false);

    let mut remote = Remote::create_anonymous(&local, &url).unwrap();
    remote.add_fetch("refs/heads/feature:refs/heads/topic").unwrap();
    remote.fetch().unwrap();

    let next = commit(&local, vec![fixture.feature], "topic work");
    local
        .refs()
        .compare_and_set("refs/heads/topic", Some(fixture.feature), next)
        .unwrap();

    remote.connect(Direction::Push).unwrap();
    let mut session = remote.push().unwrap();
    session.add_refspec("refs/heads/topic:refs/heads/topic").unwrap();
    session.add_refspec(":refs/heads/br2").unwrap();
    session.finish().unwrap();

    assert!(session.unpack_ok());
    assert_eq!(
        session.status_of("refs/heads/topic").unwrap().outcome,
        PushOutcome::Accepted
    );
    assert_eq!(
        session.status_of("refs/heads/br2").unwrap().outcome,
        PushOutcome::Accepted
    );
    assert_eq!(ref_value(&fixture.repo, "refs/heads/topic"), Some(next));
    assert_eq!(ref_value(&fixture.repo, "refs/heads/br2"), None);
}
