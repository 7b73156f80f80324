/// Splits the inbound stream into length-prefixed frames.
pub const SPLITTER: &str = "splitter";

/// Writes the length prefix of outbound frames.
pub const PREPENDER: &str = "prepender";

/// Inflates compressed inbound frames. Present once compression is negotiated.
pub const DECOMPRESS: &str = "decompress";

/// Deflates outbound frames. Present once compression is negotiated.
pub const COMPRESS: &str = "compress";

/// Turns frames into packets.
pub const DECODER: &str = "decoder";

/// Turns packets into frames.
pub const ENCODER: &str = "encoder";

/// Placeholder standing in for the decoder until a protocol is configured.
pub const INBOUND_CONFIG: &str = "inbound_config";

/// Placeholder standing in for the encoder until a protocol is configured.
pub const OUTBOUND_CONFIG: &str = "outbound_config";

/// Attribute holding the protocol of both directions.
pub const PROTOCOL_ATTRIBUTE: &str = "protocol";

/// Attribute holding the codec data of the server-bound direction.
pub const SERVERBOUND_ATTRIBUTE: &str = "serverbound_protocol";

/// Attribute holding the codec data of the client-bound direction.
pub const CLIENTBOUND_ATTRIBUTE: &str = "clientbound_protocol";

/// Largest frame the splitter accepts (a three-byte VarInt length).
pub const MAX_FRAME_LENGTH: usize = 2_097_151;

/// Size of the socket read buffer used by stream readers.
pub const READ_BUF_SIZE: usize = 8192;
