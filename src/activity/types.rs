//! Enumerated attribute types of an activity record.
//!
//! Every type parses from its ordinal number or its case-insensitive name
//! (`"ERROR"`, `"error"`, `"2"`), matching what raw sources tend to carry.

use serde::Serialize;
use std::fmt;

use crate::value::FieldValue;

macro_rules! activity_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        pub enum $name {
            $(
                #[serde(rename = $label)]
                $variant,
            )+
        }

        impl $name {
            pub const VALUES: &'static [$name] = &[$($name::$variant),+];

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            pub fn ordinal(self) -> usize {
                $name::VALUES.iter().position(|v| *v == self).unwrap_or(0)
            }

            pub fn from_ordinal(ordinal: i64) -> Option<Self> {
                usize::try_from(ordinal)
                    .ok()
                    .and_then(|i| $name::VALUES.get(i).copied())
            }

            /// Case-insensitive name lookup; `-` and spaces match `_`.
            pub fn from_name(name: &str) -> Option<Self> {
                let wanted = name.trim().replace(['-', ' '], "_");
                $name::VALUES
                    .iter()
                    .copied()
                    .find(|v| v.label().eq_ignore_ascii_case(&wanted))
            }

            /// Parse from an ordinal or a name.
            pub fn from_value(value: &FieldValue) -> Option<Self> {
                match value {
                    FieldValue::Int(i) => Self::from_ordinal(*i),
                    FieldValue::Float(f) if f.fract() == 0.0 => Self::from_ordinal(*f as i64),
                    FieldValue::String(s) => match s.trim().parse::<i64>() {
                        Ok(i) => Self::from_ordinal(i),
                        Err(_) => Self::from_name(s),
                    },
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.label())
            }
        }
    };
}

activity_enum!(
    /// Kind of operation an activity describes.
    OpType {
        Other = "OTHER",
        Start = "START",
        Open = "OPEN",
        Send = "SEND",
        Receive = "RECEIVE",
        Close = "CLOSE",
        End = "END",
        Inquire = "INQUIRE",
        Set = "SET",
        Call = "CALL",
        Url = "URL",
        Browse = "BROWSE",
        Stop = "STOP",
        Event = "EVENT",
    }
);

activity_enum!(
    /// Completion code of an operation.
    OpCompCode {
        Success = "SUCCESS",
        Warning = "WARNING",
        Error = "ERROR",
    }
);

activity_enum!(
    /// Severity of an activity.
    OpLevel {
        None = "NONE",
        Trace = "TRACE",
        Debug = "DEBUG",
        Info = "INFO",
        Notice = "NOTICE",
        Warning = "WARNING",
        Error = "ERROR",
        Critical = "CRITICAL",
        Failure = "FAILURE",
        Fatal = "FATAL",
        Halt = "HALT",
    }
);

activity_enum!(
    ResourceManagerType {
        Unknown = "UNKNOWN",
        MessagingServer = "MESSAGING_SERVER",
        DatabaseServer = "DATABASE_SERVER",
        WebServer = "WEB_SERVER",
        ApplicationServer = "APPLICATION_SERVER",
        FileServer = "FILE_SERVER",
        SearchEngine = "SEARCH_ENGINE",
    }
);

activity_enum!(
    ResourceType {
        Unknown = "UNKNOWN",
        Queue = "QUEUE",
        Topic = "TOPIC",
        Channel = "CHANNEL",
        Database = "DATABASE",
        Table = "TABLE",
        File = "FILE",
        Service = "SERVICE",
        Application = "APPLICATION",
        Network = "NETWORK",
    }
);

activity_enum!(
    /// Transport a message travelled over.
    TransportType {
        Unknown = "UNKNOWN",
        Http = "HTTP",
        Https = "HTTPS",
        Mq = "MQ",
        Jms = "JMS",
        Tcp = "TCP",
        Udp = "UDP",
        File = "FILE",
    }
);

activity_enum!(
    /// Role of the logical unit of work.
    LuwType {
        Unknown = "UNKNOWN",
        Producer = "PRODUCER",
        Processor = "PROCESSOR",
        Consumer = "CONSUMER",
    }
);

activity_enum!(
    /// Status of the logical unit of work.
    ActivityStatus {
        Begin = "BEGIN",
        End = "END",
        Exception = "EXCEPTION",
    }
);

impl OpType {
    /// Map a raw operation descriptor onto an operation type. Exact names
    /// and ordinals win; otherwise common verbs in the descriptor decide
    /// (`MQPUT` is a send, `MQGET` a receive), falling back to `OTHER`.
    pub fn map(value: &FieldValue) -> OpType {
        if let Some(op) = OpType::from_value(value) {
            return op;
        }
        let text = match value {
            FieldValue::String(s) => s.trim().to_ascii_uppercase(),
            _ => return OpType::Other,
        };

        const KEYWORDS: &[(&str, OpType)] = &[
            ("PUT", OpType::Send),
            ("SEND", OpType::Send),
            ("GET", OpType::Receive),
            ("RECEIVE", OpType::Receive),
            ("BROWSE", OpType::Browse),
            ("OPEN", OpType::Open),
            ("CONNECT", OpType::Open),
            ("CLOSE", OpType::Close),
            ("DISC", OpType::Close),
            ("INQ", OpType::Inquire),
            ("SET", OpType::Set),
            ("CALL", OpType::Call),
            ("BEGIN", OpType::Start),
            ("START", OpType::Start),
            ("STOP", OpType::Stop),
            ("END", OpType::End),
        ];
        KEYWORDS
            .iter()
            .find(|(kw, _)| text.contains(kw))
            .map(|(_, op)| *op)
            .unwrap_or(OpType::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_by_name_and_ordinal() {
        assert_eq!(OpCompCode::from_value(&"error".into()), Some(OpCompCode::Error));
        assert_eq!(OpCompCode::from_value(&FieldValue::Int(1)), Some(OpCompCode::Warning));
        assert_eq!(OpCompCode::from_value(&"2".into()), Some(OpCompCode::Error));
        assert_eq!(OpCompCode::from_value(&"MAYBE".into()), None);
        assert_eq!(OpCompCode::from_value(&FieldValue::Int(7)), None);
    }

    #[test]
    fn test_multiword_names() {
        assert_eq!(
            ResourceManagerType::from_name("messaging server"),
            Some(ResourceManagerType::MessagingServer)
        );
        assert_eq!(ResourceManagerType::MessagingServer.to_string(), "MESSAGING_SERVER");
    }

    #[test]
    fn test_op_level_ordinals() {
        assert_eq!(OpLevel::Info.ordinal(), 3);
        assert_eq!(OpLevel::from_ordinal(6), Some(OpLevel::Error));
    }

    #[test]
    fn test_op_type_mapping() {
        assert_eq!(OpType::map(&"SEND".into()), OpType::Send);
        assert_eq!(OpType::map(&"MQPUT1".into()), OpType::Send);
        assert_eq!(OpType::map(&"MQGET".into()), OpType::Receive);
        assert_eq!(OpType::map(&FieldValue::Int(4)), OpType::Receive);
        assert_eq!(OpType::map(&"frobnicate".into()), OpType::Other);
    }
}
