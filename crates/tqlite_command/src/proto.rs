//! Statement messages. Hand-written prost structs; field tags and enum
//! values match the production protobuf wire.

/// A single SQL statement.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Statement {
    #[prost(string, tag = "1")]
    pub sql: String,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Statement {
        Statement { sql: sql.into() }
    }
}

/// A list of statements plus the transaction flag.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    #[prost(bool, tag = "1")]
    pub transaction: bool,
    #[prost(message, repeated, tag = "2")]
    pub statements: Vec<Statement>,
}

/// Statements that modify the database.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteRequest {
    #[prost(message, optional, tag = "1")]
    pub request: Option<Request>,
    #[prost(bool, tag = "2")]
    pub timings: bool,
}

/// Read-only statements, with the requested consistency.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryRequest {
    #[prost(message, optional, tag = "1")]
    pub request: Option<Request>,
    #[prost(bool, tag = "2")]
    pub timings: bool,
    #[prost(enumeration = "QueryRequestLevel", tag = "3")]
    pub level: i32,
    /// Maximum staleness for stale reads, in nanoseconds. Zero disables.
    #[prost(int64, tag = "4")]
    pub freshness: i64,
}

/// Read-consistency level for a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum QueryRequestLevel {
    None = 0,
    Weak = 1,
    Strong = 2,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn execute_request_round_trips() {
        let er = ExecuteRequest {
            request: Some(Request {
                transaction: true,
                statements: vec![Statement::new("CREATE TABLE t(x)"), Statement::new("DROP TABLE t")],
            }),
            timings: true,
        };
        let buf = er.encode_to_vec();
        let decoded = ExecuteRequest::decode(buf.as_slice()).unwrap();
        assert_eq!(decoded, er);
    }

    #[test]
    fn query_request_round_trips() {
        let qr = QueryRequest {
            request: Some(Request {
                transaction: false,
                statements: vec![Statement::new("SELECT 1")],
            }),
            timings: false,
            level: QueryRequestLevel::Strong as i32,
            freshness: 1_000_000_000,
        };
        let buf = qr.encode_to_vec();
        let decoded = QueryRequest::decode(buf.as_slice()).unwrap();
        assert_eq!(decoded, qr);
        assert_eq!(
            QueryRequestLevel::try_from(decoded.level).unwrap(),
            QueryRequestLevel::Strong
        );
    }

    #[test]
    fn level_enum_values_are_stable() {
        // The wire depends on these numbers.
        assert_eq!(QueryRequestLevel::None as i32, 0);
        assert_eq!(QueryRequestLevel::Weak as i32, 1);
        assert_eq!(QueryRequestLevel::Strong as i32, 2);
    }
}
