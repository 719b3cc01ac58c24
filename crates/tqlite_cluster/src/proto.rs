//! Wire messages for the address service. Hand-written prost structs;
//! field tags and enum values match the production protobuf.

/// A request to a peer's cluster service.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
    #[prost(enumeration = "CommandType", tag = "1")]
    pub r#type: i32,
}

impl Command {
    pub fn get_node_api_url() -> Command {
        Command {
            r#type: CommandType::GetNodeApiUrl as i32,
        }
    }
}

/// The reply carrying a peer's HTTP API URL.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Address {
    #[prost(string, tag = "1")]
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum CommandType {
    Unspecified = 0,
    GetNodeApiUrl = 1,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn command_round_trips() {
        let cmd = Command::get_node_api_url();
        let buf = cmd.encode_to_vec();
        let decoded = Command::decode(buf.as_slice()).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(
            CommandType::try_from(decoded.r#type).unwrap(),
            CommandType::GetNodeApiUrl
        );
    }

    #[test]
    fn address_round_trips() {
        let addr = Address {
            url: "http://10.0.0.1:4001".into(),
        };
        let buf = addr.encode_to_vec();
        assert_eq!(Address::decode(buf.as_slice()).unwrap(), addr);
    }

    #[test]
    fn empty_reply_decodes_to_empty_url() {
        // A peer that closes without writing produces an empty buffer,
        // which decodes as an Address with an empty URL.
        let addr = Address::decode(&[][..]).unwrap();
        assert_eq!(addr.url, "");
    }
}
