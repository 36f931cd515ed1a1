//! Empty-body query messages

/// Define a message type whose body is always empty
macro_rules! impl_empty_query {
    ($(#[$meta:meta])* $name:ident, $type_str:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl $crate::protocol::message::Message for $name {
            fn message_type() -> &'static str {
                $type_str
            }

            fn encode_content(&self) -> $crate::error::Result<Vec<u8>> {
                Ok(Vec::new())
            }

            fn decode_content(_data: &[u8]) -> $crate::error::Result<Self> {
                Ok(Self)
            }
        }
    };
}

impl_empty_query!(
    /// Asks the server which message types it sends (answered with CAPABILITY)
    GetCapabilityMessage,
    "GET_CAPABIL"
);

impl_empty_query!(
    /// Asks the server for its status (answered with STATUS)
    GetStatusMessage,
    "GET_STATUS"
);
