use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use proctord::config::AttendancePolicy;
use proctord::tenant::TenantManager;
use proctord::wire;

/// 2024-10-04 00:00 UTC.
const DAY: i64 = 20_000 * 86_400_000;
const H: i64 = 3_600_000;
const M: i64 = 60_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("proctord_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(
        dir,
        1000,
        AttendancePolicy::default(),
        Duration::from_secs(3600),
    ));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "proctord".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, db: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("proctord")
        .password("proctord");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

async fn insert_assignment(client: &Client, proctor: Ulid, room: Ulid, start: i64, end: i64) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO assignments (id, exam_schedule_id, proctor_id, start, "end", room_id) VALUES ('{id}', '{}', '{proctor}', {start}, {end}, '{room}')"#,
            Ulid::new()
        ))
        .await
        .unwrap();
    id
}

async fn issue_code(client: &Client, assignment: Ulid) -> String {
    let issued = rows(client, &format!("INSERT INTO codes (assignment_id) VALUES ('{assignment}')")).await;
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].get("assignment_id"), Some(assignment.to_string().as_str()));
    issued[0].get("code").unwrap().to_string()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn check_in_flow_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "school_a").await;

    let proctor = Ulid::new();
    let room = Ulid::new();
    let id = insert_assignment(&client, proctor, room, DAY + 9 * H, DAY + 10 * H).await;
    let code = issue_code(&client, id).await;

    let verified = rows(
        &client,
        &format!("SELECT * FROM verify WHERE code = '{}' AND person_id = '{proctor}'", code.to_lowercase()),
    )
    .await;
    assert_eq!(verified.len(), 1);
    assert_eq!(verified[0].get("assignment_id"), Some(id.to_string().as_str()));
    assert_eq!(verified[0].get("classification"), Some("assigned-match"));

    let checked = rows(
        &client,
        &format!(
            "INSERT INTO checkins (code, person_id, at) VALUES ('{code}', '{proctor}', {})",
            DAY + 9 * H + 2 * M
        ),
    )
    .await;
    assert_eq!(checked[0].get("status"), Some("confirmed"));

    // Single use.
    let again = format!(
        "INSERT INTO checkins (code, person_id, at) VALUES ('{code}', '{proctor}', {})",
        DAY + 9 * H + 3 * M
    );
    assert_eq!(sqlstate(&client, &again).await, "P0002");

    let listed = rows(&client, &format!("SELECT * FROM assignments WHERE proctor_id = '{proctor}'")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("status"), Some("confirmed"));
    assert_eq!(listed[0].get("checked_in_by"), Some(proctor.to_string().as_str()));
}

#[tokio::test]
async fn substitute_needs_remarks() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "school_b").await;

    let id = insert_assignment(&client, Ulid::new(), Ulid::new(), DAY + 9 * H, DAY + 10 * H).await;
    let code = issue_code(&client, id).await;
    let sub = Ulid::new();

    let missing = format!("INSERT INTO checkins (code, person_id, at) VALUES ('{code}', '{sub}', {})", DAY + 9 * H);
    assert_eq!(sqlstate(&client, &missing).await, "P0001");

    let ok = rows(
        &client,
        &format!(
            "INSERT INTO checkins (code, person_id, remarks, at) VALUES ('{code}', '{sub}', 'covering', {})",
            DAY + 9 * H
        ),
    )
    .await;
    assert_eq!(ok[0].get("status"), Some("substitute"));
}

#[tokio::test]
async fn room_occupancy_includes_exams() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "school_c").await;

    let room = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO bookings (id, resource_id, start, "end") VALUES ('{}', '{room}', {}, {})"#,
            Ulid::new(),
            DAY + 8 * H,
            DAY + 9 * H
        ))
        .await
        .unwrap();
    insert_assignment(&client, Ulid::new(), room, DAY + 9 * H, DAY + 10 * H + 30 * M).await;

    let intervals = rows(
        &client,
        &format!("SELECT * FROM occupancy WHERE resource_id = '{room}' AND day = {}", DAY + 12 * H),
    )
    .await;
    let got: Vec<(String, String, String)> = intervals
        .iter()
        .map(|r| {
            (
                r.get("start").unwrap().to_string(),
                r.get("end").unwrap().to_string(),
                r.get("occupied").unwrap().to_string(),
            )
        })
        .collect();
    let expected = [
        (DAY + 7 * H + 30 * M, DAY + 8 * H, "f"),
        (DAY + 8 * H, DAY + 10 * H + 30 * M, "t"),
        (DAY + 10 * H + 30 * M, DAY + 21 * H, "f"),
    ];
    assert_eq!(got.len(), expected.len());
    for ((start, end, occupied), (es, ee, eo)) in got.iter().zip(expected) {
        assert_eq!(start, &es.to_string());
        assert_eq!(end, &ee.to_string());
        assert_eq!(occupied, eo);
    }
}

#[tokio::test]
async fn sweep_override_and_summary() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "school_d").await;

    let missed = insert_assignment(&client, Ulid::new(), Ulid::new(), DAY + 9 * H, DAY + 10 * H).await;
    let excused = insert_assignment(&client, Ulid::new(), Ulid::new(), DAY + 9 * H, DAY + 10 * H).await;
    insert_assignment(&client, Ulid::new(), Ulid::new(), DAY + 15 * H, DAY + 16 * H).await;

    let swept = rows(&client, &format!("SELECT * FROM absence_sweep WHERE at = {}", DAY + 12 * H)).await;
    assert_eq!(swept.len(), 2);
    assert!(swept.iter().any(|r| r.get("assignment_id") == Some(missed.to_string().as_str())));
    let again = rows(&client, &format!("SELECT * FROM absence_sweep WHERE at = {}", DAY + 12 * H)).await;
    assert!(again.is_empty());

    client
        .batch_execute(&format!(
            "INSERT INTO overrides (assignment_id, status, remarks) VALUES ('{excused}', 'confirmed', 'signed in on paper')"
        ))
        .await
        .unwrap();

    let summary = rows(&client, "SELECT * FROM attendance_summary").await;
    let count = |status: &str| {
        summary
            .iter()
            .find(|r| r.get("status") == Some(status))
            .and_then(|r| r.get("count"))
            .map(str::to_string)
    };
    assert_eq!(count("pending").as_deref(), Some("1"));
    assert_eq!(count("absent").as_deref(), Some("1"));
    assert_eq!(count("confirmed").as_deref(), Some("1"));
    assert_eq!(count("late").as_deref(), Some("0"));
}

#[tokio::test]
async fn tenants_are_isolated() {
    let (addr, _tm) = start_test_server().await;
    let a = connect(addr, "tenant_a").await;
    let b = connect(addr, "tenant_b").await;

    let id = insert_assignment(&a, Ulid::new(), Ulid::new(), DAY + 9 * H, DAY + 10 * H).await;
    let code = issue_code(&a, id).await;

    assert!(rows(&b, "SELECT * FROM assignments").await.is_empty());
    let lookup = format!("SELECT * FROM verify WHERE code = '{code}' AND person_id = '{}'", Ulid::new());
    assert_eq!(sqlstate(&b, &lookup).await, "P0002");
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "errors").await;

    assert_eq!(sqlstate(&client, "SELECT * FROM nowhere").await, "42601");
    assert_eq!(sqlstate(&client, "SELEC broken").await, "42601");
    let missing = format!("INSERT INTO codes (assignment_id) VALUES ('{}')", Ulid::new());
    assert_eq!(sqlstate(&client, &missing).await, "P0002");
    let inverted = format!(
        r#"INSERT INTO assignments (id, exam_schedule_id, proctor_id, start, "end") VALUES ('{}', '{}', '{}', {}, {})"#,
        Ulid::new(),
        Ulid::new(),
        Ulid::new(),
        DAY + 10 * H,
        DAY + 9 * H
    );
    assert_eq!(sqlstate(&client, &inverted).await, "P0001");

    let far_day = format!("SELECT * FROM occupancy WHERE resource_id = '{}' AND day = {}", Ulid::new(), i64::MAX);
    assert_eq!(sqlstate(&client, &far_day).await, "P0001");
    let proctor = Ulid::new();
    let id = insert_assignment(&client, proctor, Ulid::new(), DAY + 9 * H, DAY + 10 * H).await;
    let code = issue_code(&client, id).await;
    let early = format!("INSERT INTO checkins (code, person_id, at) VALUES ('{code}', '{proctor}', -1)");
    assert_eq!(sqlstate(&client, &early).await, "P0001");
    // Still connected, and the code was not consumed.
    let listed = rows(&client, "SELECT * FROM assignments").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("status"), Some("pending"));
}

#[tokio::test]
async fn extended_protocol_verify() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "extended").await;

    let proctor = Ulid::new();
    let id = insert_assignment(&client, proctor, Ulid::new(), DAY + 9 * H, DAY + 10 * H).await;
    let code = issue_code(&client, id).await;

    let other = Ulid::new().to_string();
    let found = client
        .query("SELECT * FROM verify WHERE code = $1 AND person_id = $2", &[&code, &other])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let classification: String = found[0].get("classification");
    assert_eq!(classification, "assigned-mismatch");
    let start: i64 = found[0].get("start");
    assert_eq!(start, DAY + 9 * H);
}
