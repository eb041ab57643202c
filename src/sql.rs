use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::engine::ReservationFilter;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertHotel {
        title: String,
    },
    UpdateHotel {
        id: HotelId,
        title: String,
    },
    DeleteHotel {
        id: HotelId,
    },
    InsertRoom {
        hotel_id: HotelId,
        number: u16,
        floor: u16,
    },
    UpdateRoom {
        id: RoomId,
        number: Option<u16>,
        floor: Option<u16>,
    },
    DeleteRoom {
        id: RoomId,
    },
    InsertReservation {
        customer: String,
        room_id: RoomId,
        stay: Stay,
    },
    SelectHotels,
    SelectRooms {
        hotel_id: HotelId,
        floor: Option<u16>,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectAvailability {
        room_id: RoomId,
        stay: Stay,
    },
    SelectAvailableRooms {
        stay: Stay,
        hotel_id: Option<HotelId>,
        room_id: Option<RoomId>,
    },
    SelectBookedRooms {
        room_ids: Vec<RoomId>,
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(&table.relation, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "hotels" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("hotels", 1, 0));
            }
            Ok(Command::InsertHotel { title: parse_string(&values[0])? })
        }
        "rooms" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("rooms", 3, values.len()));
            }
            Ok(Command::InsertRoom {
                hotel_id: parse_id(&values[0])?,
                number: parse_u16(&values[1])?,
                floor: parse_u16(&values[2])?,
            })
        }
        "reservations" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("reservations", 4, values.len()));
            }
            Ok(Command::InsertReservation {
                customer: parse_string(&values[0])?,
                room_id: parse_id(&values[1])?,
                stay: Stay::new(parse_date(&values[2])?, parse_date(&values[3])?),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut columns = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        columns.push((column, &a.value));
    }

    match table.as_str() {
        "hotels" => {
            let mut title = None;
            for (column, value) in columns {
                match column.as_str() {
                    "title" => title = Some(parse_string(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateHotel {
                id,
                title: title.ok_or(SqlError::MissingColumn("title"))?,
            })
        }
        "rooms" => {
            let (mut number, mut floor) = (None, None);
            for (column, value) in columns {
                match column.as_str() {
                    "number" => number = Some(parse_u16(value)?),
                    "floor" => floor = Some(parse_u16(value)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            if number.is_none() && floor.is_none() {
                return Err(SqlError::MissingColumn("number or floor"));
            }
            Ok(Command::UpdateRoom { id, number, floor })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "hotels" => Ok(Command::DeleteHotel { id }),
        "rooms" => Ok(Command::DeleteRoom { id }),
        "reservations" => Err(SqlError::Unsupported("reservations cannot be deleted".into())),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column predicates collected from a WHERE clause of AND-ed comparisons.
#[derive(Default)]
struct Filters {
    id: Option<u64>,
    hotel_id: Option<HotelId>,
    room_id: Option<RoomId>,
    room_ids: Option<Vec<RoomId>>,
    floor: Option<u16>,
    customer: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut f = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut f)?;
    }

    match table.as_str() {
        "hotels" => Ok(Command::SelectHotels),
        "rooms" => Ok(Command::SelectRooms {
            hotel_id: f.hotel_id.ok_or(SqlError::MissingFilter("hotel_id"))?,
            floor: f.floor,
        }),
        "reservations" => Ok(Command::SelectReservations {
            filter: ReservationFilter {
                room_id: f.room_id,
                hotel_id: f.hotel_id,
                customer: f.customer,
            },
        }),
        "availability" => Ok(Command::SelectAvailability {
            room_id: f.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            stay: required_stay(&f)?,
        }),
        "available_rooms" => Ok(Command::SelectAvailableRooms {
            stay: required_stay(&f)?,
            hotel_id: f.hotel_id,
            room_id: f.id,
        }),
        "booked_rooms" => Ok(Command::SelectBookedRooms {
            room_ids: f
                .room_ids
                .or(f.room_id.map(|id| vec![id]))
                .ok_or(SqlError::MissingFilter("room_id"))?,
            from: f.start_date,
            until: f.end_date,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn required_stay(f: &Filters) -> Result<Stay, SqlError> {
    Ok(Stay::new(
        f.start_date.ok_or(SqlError::MissingFilter("start_date"))?,
        f.end_date.ok_or(SqlError::MissingFilter("end_date"))?,
    ))
}

fn extract_filters(expr: &Expr, f: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, f)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, f)?;
                extract_filters(right, f)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => f.id = Some(parse_id(right)?),
                Some("hotel_id") => f.hotel_id = Some(parse_id(right)?),
                Some("room_id") => f.room_id = Some(parse_id(right)?),
                Some("floor") => f.floor = Some(parse_u16(right)?),
                Some("customer") => f.customer = Some(parse_string(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start_date") {
                    f.start_date = Some(parse_date(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end_date") {
                    f.end_date = Some(parse_date(right)?);
                }
            }
            ast::BinaryOperator::Or => {
                return Err(SqlError::Unsupported("OR in WHERE".into()));
            }
            _ => {}
        },
        Expr::InList { expr, list, negated: false } => {
            if expr_column_name(expr).as_deref() == Some("room_id") {
                if list.len() > crate::limits::MAX_IN_CLAUSE_IDS {
                    return Err(SqlError::TooManyValues(list.len()));
                }
                let ids = list.iter().map(parse_id).collect::<Result<Vec<_>, _>>()?;
                f.room_ids = Some(ids);
            }
        }
        _ => {}
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// First row of a VALUES list. Multi-row inserts are rejected.
fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<u64, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_id(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_id(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64_expr(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} is not a valid id")))
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64_expr(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

/// `'YYYY-MM-DD'` literal.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::BadDate(s, e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingColumn(&'static str),
    BadDate(String, String),
    TooManyValues(usize),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::BadDate(s, e) => write!(f, "bad date {s:?} (expected YYYY-MM-DD): {e}"),
            SqlError::TooManyValues(n) => write!(f, "IN list too long: {n} values"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn parse_insert_hotel() {
        let cmd = parse_sql("INSERT INTO hotels (title) VALUES ('Grand Budapest')").unwrap();
        assert_eq!(cmd, Command::InsertHotel { title: "Grand Budapest".into() });
    }

    #[test]
    fn parse_insert_room() {
        let cmd = parse_sql("INSERT INTO rooms (hotel_id, number, floor) VALUES (1, 101, 1)").unwrap();
        assert_eq!(cmd, Command::InsertRoom { hotel_id: 1, number: 101, floor: 1 });
    }

    #[test]
    fn parse_insert_room_out_of_range() {
        let sql = "INSERT INTO rooms (hotel_id, number, floor) VALUES (1, 70000, 1)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
        let sql = "INSERT INTO rooms (hotel_id, number, floor) VALUES (1, -1, 1)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = "INSERT INTO reservations (customer, room_id, start_date, end_date) \
                   VALUES ('Zero', 3, '2030-01-01', '2030-01-10')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { customer, room_id, stay } => {
                assert_eq!(customer, "Zero");
                assert_eq!(room_id, 3);
                assert_eq!(stay, Stay::new(d("2030-01-01"), d("2030-01-10")));
            }
            other => panic!("expected InsertReservation, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_bad_date() {
        let sql = "INSERT INTO reservations (customer, room_id, start_date, end_date) \
                   VALUES ('Zero', 3, '2030-02-30', '2030-03-01')";
        assert!(matches!(parse_sql(sql), Err(SqlError::BadDate(..))));
    }

    #[test]
    fn parse_insert_reservation_wrong_arity() {
        let sql = "INSERT INTO reservations (customer, room_id) VALUES ('Zero', 3)";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity("reservations", 4, 2))));
    }

    #[test]
    fn parse_multi_row_insert_rejected() {
        let sql = "INSERT INTO hotels (title) VALUES ('A'), ('B')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_hotel() {
        let cmd = parse_sql("UPDATE hotels SET title = 'New' WHERE id = 4").unwrap();
        assert_eq!(cmd, Command::UpdateHotel { id: 4, title: "New".into() });
    }

    #[test]
    fn parse_update_room_partial() {
        let cmd = parse_sql("UPDATE rooms SET floor = 3 WHERE id = 2").unwrap();
        assert_eq!(cmd, Command::UpdateRoom { id: 2, number: None, floor: Some(3) });

        let cmd = parse_sql("UPDATE rooms SET number = 301, floor = 3 WHERE id = 2").unwrap();
        assert_eq!(cmd, Command::UpdateRoom { id: 2, number: Some(301), floor: Some(3) });
    }

    #[test]
    fn parse_update_unknown_column() {
        let sql = "UPDATE rooms SET hotel_id = 9 WHERE id = 2";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(c)) if c == "hotel_id"));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE hotels SET title = 'x'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_deletes() {
        assert_eq!(parse_sql("DELETE FROM hotels WHERE id = 1").unwrap(), Command::DeleteHotel { id: 1 });
        assert_eq!(parse_sql("DELETE FROM rooms WHERE id = 7").unwrap(), Command::DeleteRoom { id: 7 });
        assert!(parse_sql("DELETE FROM reservations WHERE id = 1").is_err());
    }

    #[test]
    fn parse_select_rooms() {
        let cmd = parse_sql("SELECT * FROM rooms WHERE hotel_id = 1 AND floor = 2").unwrap();
        assert_eq!(cmd, Command::SelectRooms { hotel_id: 1, floor: Some(2) });
        assert!(matches!(
            parse_sql("SELECT * FROM rooms"),
            Err(SqlError::MissingFilter("hotel_id"))
        ));
    }

    #[test]
    fn parse_select_reservations_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations { filter: ReservationFilter::default() }
        );
        let cmd = parse_sql("SELECT * FROM reservations WHERE hotel_id = 2 AND customer = 'Ann'").unwrap();
        assert_eq!(
            cmd,
            Command::SelectReservations {
                filter: ReservationFilter {
                    room_id: None,
                    hotel_id: Some(2),
                    customer: Some("Ann".into()),
                },
            }
        );
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE room_id = 5 \
                   AND start_date >= '2030-01-01' AND end_date <= '2030-01-04'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                room_id: 5,
                stay: Stay::new(d("2030-01-01"), d("2030-01-04")),
            }
        );
    }

    #[test]
    fn parse_select_availability_missing_dates() {
        let sql = "SELECT * FROM availability WHERE room_id = 5 AND start_date >= '2030-01-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("end_date"))));
    }

    #[test]
    fn parse_select_available_rooms() {
        let sql = "SELECT * FROM available_rooms WHERE start_date >= '2030-01-01' \
                   AND end_date <= '2030-01-04' AND hotel_id = 2";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailableRooms {
                stay: Stay::new(d("2030-01-01"), d("2030-01-04")),
                hotel_id: Some(2),
                room_id: None,
            }
        );
    }

    #[test]
    fn parse_select_booked_rooms() {
        let sql = "SELECT * FROM booked_rooms WHERE room_id IN (1, 2, 3) AND start_date >= '2030-01-01'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectBookedRooms {
                room_ids: vec![1, 2, 3],
                from: Some(d("2030-01-01")),
                until: None,
            }
        );
        let single = parse_sql("SELECT * FROM booked_rooms WHERE room_id = 4").unwrap();
        assert!(matches!(single, Command::SelectBookedRooms { room_ids, .. } if room_ids == vec![4]));
    }

    #[test]
    fn parse_or_rejected() {
        let sql = "SELECT * FROM reservations WHERE room_id = 1 OR room_id = 2";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM guests"),
            Err(SqlError::UnknownTable(t)) if t == "guests"
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
