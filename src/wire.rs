use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::InnkeepAuthSource;
use crate::engine::{today, Engine, EngineError, RoomFilter};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct InnkeepHandler {
    engine: Arc<Engine>,
    query_parser: Arc<InnkeepQueryParser>,
}

impl InnkeepHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(InnkeepQueryParser),
        }
    }

    /// Parse, run and time one statement.
    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(cmd).await;

        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertHotel { title } => {
                let hotel = engine.create_hotel(title).await.map_err(engine_err)?;
                hotel_rows(vec![hotel])
            }
            Command::UpdateHotel { id, title } => {
                engine.update_hotel(id, title).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteHotel { id } => {
                engine.delete_hotel(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertRoom { hotel_id, number, floor } => {
                let room = engine
                    .create_room(hotel_id, number, floor)
                    .await
                    .map_err(engine_err)?;
                room_rows(vec![room])
            }
            Command::UpdateRoom { id, number, floor } => {
                engine.update_room(id, number, floor).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertReservation { customer, room_id, stay } => {
                let info = engine
                    .create_reservation(customer, room_id, stay, today())
                    .await
                    .map_err(engine_err)?;
                reservation_rows(vec![info])
            }
            Command::SelectHotels => hotel_rows(engine.list_hotels()),
            Command::SelectRooms { hotel_id, floor } => {
                room_rows(engine.list_rooms(hotel_id, floor).await)
            }
            Command::SelectReservations { filter } => {
                reservation_rows(engine.list_reservations(&filter).await)
            }
            Command::SelectAvailability { room_id, stay } => {
                let available = match engine.check_room_available(room_id, &stay).await {
                    Ok(()) => true,
                    Err(EngineError::RoomAlreadyReserved { .. }) => false,
                    Err(e) => return Err(engine_err(e)),
                };
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(room_id as i64))?;
                encoder.encode_field(&available)?;
                Ok(query_response(schema, vec![Ok(encoder.take_row())]))
            }
            Command::SelectAvailableRooms { stay, hotel_id, room_id } => {
                let rooms = engine
                    .available_rooms(&stay, today(), RoomFilter { hotel_id, room_id })
                    .await
                    .map_err(engine_err)?;
                room_rows(rooms)
            }
            Command::SelectBookedRooms { room_ids, from, until } => {
                let booked = engine
                    .booked_rooms(&room_ids, from, until)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(booked_rooms_schema());
                let rows = booked
                    .iter()
                    .map(|info| {
                        let line = serde_json::to_string(info).map_err(|e| {
                            PgWireError::ApiError(Box::new(e))
                        })?;
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&line)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn hotel_schema() -> Vec<FieldInfo> {
    vec![field("id", Type::INT8), field("title", Type::VARCHAR)]
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("hotel_id", Type::INT8),
        field("number", Type::INT4),
        field("floor", Type::INT4),
    ]
}

/// Reservation columns. The room and hotel columns are NULL once the room
/// has been deleted.
fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::INT8),
        field("customer", Type::VARCHAR),
        field("room_id", Type::INT8),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
        field("number", Type::INT4),
        field("floor", Type::INT4),
        field("hotel_id", Type::INT8),
        field("hotel_title", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![field("room_id", Type::INT8), field("available", Type::BOOL)]
}

fn booked_rooms_schema() -> Vec<FieldInfo> {
    vec![field("line", Type::VARCHAR)]
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn hotel_rows(hotels: Vec<Hotel>) -> PgWireResult<Response> {
    let schema = Arc::new(hotel_schema());
    let rows = hotels
        .iter()
        .map(|h| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&(h.id as i64))?;
            encoder.encode_field(&h.title)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(schema, rows))
}

fn room_rows(rooms: Vec<Room>) -> PgWireResult<Response> {
    let schema = Arc::new(room_schema());
    let rows = rooms
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&(r.id as i64))?;
            encoder.encode_field(&(r.hotel_id as i64))?;
            encoder.encode_field(&i32::from(r.number))?;
            encoder.encode_field(&i32::from(r.floor))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(schema, rows))
}

fn reservation_rows(reservations: Vec<ReservationInfo>) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows = reservations
        .iter()
        .map(|info| {
            let room = info.room.as_ref();
            let hotel = info.hotel();
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&(info.id as i64))?;
            encoder.encode_field(&info.customer)?;
            encoder.encode_field(&(info.room_id as i64))?;
            encoder.encode_field(&info.start_date.to_string())?;
            encoder.encode_field(&info.end_date.to_string())?;
            encoder.encode_field(&room.map(|r| i32::from(r.number)))?;
            encoder.encode_field(&room.map(|r| i32::from(r.floor)))?;
            encoder.encode_field(&hotel.map(|h| h.id as i64))?;
            encoder.encode_field(&hotel.map(|h| h.title.clone()))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(schema, rows))
}

/// Columns a statement returns, guessed from its text for Describe.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("INSERT")) {
        return vec![];
    }
    if upper.contains("BOOKED_ROOMS") {
        booked_rooms_schema()
    } else if upper.contains("AVAILABLE_ROOMS") {
        room_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("RESERVATIONS") {
        reservation_schema()
    } else if upper.contains("ROOMS") {
        room_schema()
    } else if upper.contains("HOTELS") {
        hotel_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline text-format parameters as quoted literals. Numbers arrive quoted
/// too; the parser accepts both.
fn substitute_params(sql: &str, params: &[Option<impl AsRef<[u8]>>]) -> String {
    let mut result = sql.to_string();
    // Highest index first so `$1` doesn't clobber `$10`.
    for (i, param) in params.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&format!("${}", i + 1), &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(InnkeepHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                InnkeepAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(InnkeepFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for an engine error.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidRange { .. } => "22007",
        EngineError::PastStart { .. } => "22008",
        EngineError::RoomAlreadyReserved { .. } => "23P01",
        EngineError::RoomAlreadyExists { .. } => "23505",
        EngineError::RoomNotFound(_) | EngineError::HotelNotFound(_) => "P0002",
        EngineError::InvalidField(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
