use std::net::SocketAddr;

/// Protocol-level rejection of a single command line.
///
/// The `Display` text is the reason sent back on the wire as `error <reason>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command")]
    UnknownCommand,

    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Out of range")]
    OutOfRange,

    #[error("Not armed")]
    NotArmed,

    #[error("Not flying")]
    NotFlying,

    #[error("Already flying")]
    AlreadyFlying,

    #[error("Battery low")]
    BatteryLow,
}

impl CommandError {
    /// Render as the reply datagram text.
    pub fn reply(self) -> String {
        format!("error {self}")
    }
}

/// Errors raised while configuring or starting the simulator.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("{instance}: cannot bind {role} socket on {addr}: {source}")]
    Bind {
        instance: String,
        role: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Port overflow: instance {index} would need a port above 65535")]
    PortOverflow { index: usize },

    #[error("Address overflow: instance {index} would need an address past the end of the IP range")]
    AddressOverflow { index: usize },

    #[error("Fleet must contain at least one drone")]
    EmptyFleet,

    #[error("Failed to read config file: {0}")]
    ConfigRead(#[source] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
