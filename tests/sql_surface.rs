use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};

use innkeep::engine::Engine;
use innkeep::wire;

// ── Test infrastructure ──────────────────────────────────────

static SERVER_SEQ: AtomicUsize = AtomicUsize::new(0);

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let n = SERVER_SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}_{n}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("innkeep.wal")).unwrap());

    let served = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = served.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "innkeep".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("innkeep")
        .user("innkeep")
        .password("innkeep");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap_or_else(|e| panic!("{sql}: {e}"))
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

/// SQLSTATE of a failed statement.
async fn error_code(client: &tokio_postgres::Client, sql: &str) -> String {
    let err = client
        .simple_query(sql)
        .await
        .expect_err("statement should fail");
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_else(|| panic!("not a server error: {err}"))
}

fn col<'a>(row: &'a SimpleQueryRow, name: &str) -> &'a str {
    row.get(name).unwrap_or_else(|| panic!("{name} is NULL"))
}

async fn create_hotel(client: &tokio_postgres::Client, title: &str) -> String {
    let r = rows(client, &format!("INSERT INTO hotels (title) VALUES ('{title}')")).await;
    col(&r[0], "id").to_string()
}

async fn create_room(client: &tokio_postgres::Client, hotel: &str, number: u16, floor: u16) -> String {
    let r = rows(
        client,
        &format!("INSERT INTO rooms (hotel_id, number, floor) VALUES ({hotel}, {number}, {floor})"),
    )
    .await;
    col(&r[0], "id").to_string()
}

fn reserve_sql(customer: &str, room: &str, start: &str, end: &str) -> String {
    format!(
        "INSERT INTO reservations (customer, room_id, start_date, end_date) \
         VALUES ('{customer}', {room}, '{start}', '{end}')"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn reservation_round_trip() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;

    let hotel = create_hotel(&client, "Grand").await;
    let room = create_room(&client, &hotel, 101, 1).await;

    let created = rows(&client, &reserve_sql("Zero", &room, "2099-01-01", "2099-01-10")).await;
    assert_eq!(created.len(), 1);
    assert_eq!(col(&created[0], "customer"), "Zero");
    assert_eq!(col(&created[0], "start_date"), "2099-01-01");
    assert_eq!(col(&created[0], "end_date"), "2099-01-10");
    assert_eq!(col(&created[0], "number"), "101");
    assert_eq!(col(&created[0], "hotel_title"), "Grand");

    let listed = rows(&client, &format!("SELECT * FROM reservations WHERE room_id = {room}")).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(col(&listed[0], "id"), col(&created[0], "id"));
}

#[tokio::test]
async fn reservation_gates_map_to_sqlstates() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let hotel = create_hotel(&client, "Grand").await;
    let room = create_room(&client, &hotel, 101, 1).await;

    rows(&client, &reserve_sql("a", &room, "2099-01-01", "2099-01-10")).await;

    // Overlap.
    assert_eq!(error_code(&client, &reserve_sql("b", &room, "2099-01-05", "2099-01-12")).await, "23P01");
    // Check-in on the checkout day is fine.
    rows(&client, &reserve_sql("c", &room, "2099-01-10", "2099-01-15")).await;
    // Inverted range, even for a room that doesn't exist.
    assert_eq!(error_code(&client, &reserve_sql("d", "9999", "2099-02-10", "2099-02-01")).await, "22007");
    // Start in the past.
    assert_eq!(error_code(&client, &reserve_sql("e", &room, "2000-01-01", "2099-02-01")).await, "22008");
    // Unknown room.
    assert_eq!(error_code(&client, &reserve_sql("f", "9999", "2099-02-01", "2099-02-02")).await, "P0002");
    // Malformed date literal.
    assert_eq!(error_code(&client, &reserve_sql("g", &room, "2099-13-01", "2099-14-01")).await, "42601");
}

#[tokio::test]
async fn room_registry_rules() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let hotel = create_hotel(&client, "Grand").await;
    create_room(&client, &hotel, 101, 1).await;

    let dup = format!("INSERT INTO rooms (hotel_id, number, floor) VALUES ({hotel}, 101, 1)");
    assert_eq!(error_code(&client, &dup).await, "23505");
    assert_eq!(
        error_code(&client, "INSERT INTO rooms (hotel_id, number, floor) VALUES (777, 1, 1)").await,
        "P0002"
    );

    let second = create_room(&client, &hotel, 102, 1).await;
    client
        .batch_execute(&format!("UPDATE rooms SET number = 201, floor = 2 WHERE id = {second}"))
        .await
        .unwrap();
    let floor_two = rows(&client, &format!("SELECT * FROM rooms WHERE hotel_id = {hotel} AND floor = 2")).await;
    assert_eq!(floor_two.len(), 1);
    assert_eq!(col(&floor_two[0], "number"), "201");

    let clash = format!("UPDATE rooms SET number = 101, floor = 1 WHERE id = {second}");
    assert_eq!(error_code(&client, &clash).await, "23505");
}

#[tokio::test]
async fn availability_and_fleet_exclusion() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let h1 = create_hotel(&client, "One").await;
    let h2 = create_hotel(&client, "Two").await;
    let r1 = create_room(&client, &h1, 1, 1).await;
    let r2 = create_room(&client, &h1, 2, 1).await;
    let r3 = create_room(&client, &h2, 1, 1).await;

    rows(&client, &reserve_sql("a", &r2, "2099-06-01", "2099-06-05")).await;

    let check = |room: &str| {
        format!(
            "SELECT * FROM availability WHERE room_id = {room} \
             AND start_date >= '2099-06-02' AND end_date <= '2099-06-03'"
        )
    };
    assert_eq!(col(&rows(&client, &check(&r1)).await[0], "available"), "t");
    assert_eq!(col(&rows(&client, &check(&r2)).await[0], "available"), "f");

    let free = rows(
        &client,
        "SELECT * FROM available_rooms WHERE start_date >= '2099-06-02' AND end_date <= '2099-06-03'",
    )
    .await;
    let ids: Vec<&str> = free.iter().map(|r| col(r, "id")).collect();
    assert_eq!(ids, vec![r1.as_str(), r3.as_str()]);

    let free_in_h2 = rows(
        &client,
        &format!(
            "SELECT * FROM available_rooms WHERE start_date >= '2099-06-02' \
             AND end_date <= '2099-06-03' AND hotel_id = {h2}"
        ),
    )
    .await;
    assert_eq!(free_in_h2.len(), 1);
    assert_eq!(col(&free_in_h2[0], "id"), r3);
}

#[tokio::test]
async fn booked_rooms_report_lines_are_json() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let hotel = create_hotel(&client, "Grand").await;
    let a = create_room(&client, &hotel, 1, 1).await;
    let b = create_room(&client, &hotel, 2, 1).await;
    rows(&client, &reserve_sql("x", &a, "2099-01-10", "2099-01-12")).await;
    rows(&client, &reserve_sql("y", &b, "2099-03-10", "2099-03-12")).await;

    let report = rows(
        &client,
        &format!(
            "SELECT * FROM booked_rooms WHERE room_id IN ({a}, {b}) \
             AND start_date >= '2099-01-01' AND end_date <= '2099-01-31'"
        ),
    )
    .await;
    assert_eq!(report.len(), 1);
    let line: serde_json::Value = serde_json::from_str(col(&report[0], "line")).unwrap();
    assert_eq!(line["customer"], "x");
    assert_eq!(line["start_date"], "2099-01-10");
    assert_eq!(line["room"]["hotel"]["title"], "Grand");
}

#[tokio::test]
async fn hotel_delete_cascades_rooms_not_reservations() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let hotel = create_hotel(&client, "Doomed").await;
    let room = create_room(&client, &hotel, 1, 1).await;
    rows(&client, &reserve_sql("a", &room, "2099-01-01", "2099-01-03")).await;

    client
        .batch_execute(&format!("DELETE FROM hotels WHERE id = {hotel}"))
        .await
        .unwrap();

    assert!(rows(&client, "SELECT * FROM hotels").await.is_empty());
    assert!(rows(&client, &format!("SELECT * FROM rooms WHERE hotel_id = {hotel}")).await.is_empty());
    let reservations = rows(&client, "SELECT * FROM reservations").await;
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].get("number"), None);
    assert_eq!(reservations[0].get("hotel_id"), None);
    assert!(engine.all_rooms().await.is_empty());

    assert_eq!(error_code(&client, &format!("DELETE FROM hotels WHERE id = {hotel}")).await, "P0002");
}

#[tokio::test]
async fn concurrent_clients_one_booking_wins() {
    let (addr, _engine) = start_test_server().await;
    let setup = connect(addr).await;
    let hotel = create_hotel(&setup, "Busy").await;
    let room = create_room(&setup, &hotel, 1, 1).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let sql = reserve_sql(&format!("guest{i}"), &room, "2099-05-01", "2099-05-04");
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client.simple_query(&sql).await.map(|_| ())
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => {
                let code = e.as_db_error().map(|db| db.code().code().to_string());
                assert_eq!(code.as_deref(), Some("23P01"));
            }
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn bad_sql_is_a_syntax_error() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    assert_eq!(error_code(&client, "SELEC nonsense").await, "42601");
    assert_eq!(error_code(&client, "SELECT * FROM guests").await, "42601");
    tokio_test::assert_ok!(client.simple_query("SELECT * FROM hotels").await);
}
