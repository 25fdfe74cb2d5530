use std::fmt::Display;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::err::{DecodeError, DecodeErrorKind, EncodeError, EncodeErrorKind};
use crate::stream::ByteReader;
use crate::AckCode;

/*
 * Every Dragonfly frame opens with the same 7-byte header:
 *
 *   offset  size  field
 *    0       2    version      (big-endian)
 *    2       1    type byte    (origin << 7 | kind << 4 | flags)
 *    3       4    body length  (big-endian)
 *
 * followed by `body length` bytes of type-specific body. Strings inside a
 * body carry a 2-byte big-endian length prefix and no terminator.
 */

pub const HEADER_LEN: usize = 7;

/// The only version ever emitted. The field is reserved; decoders accept
/// any value and leave it to the caller to log nonzero ones.
pub const PROTOCOL_VERSION: u16 = 0;

const ORIGIN_BIT: u8 = 0b1000_0000;
const KIND_BITS: u8 = 0b0111_0000;
const FLAG_BITS: u8 = 0b0000_1111;

/*
 * CONNECT flag bits. Bit 1 and bit 0 mirror the presence of the username
 * and password strings in the body; bit 2 turns the frame into a graceful
 * disconnect request with an empty body. A CONNECTED ack reuses bit 2 to
 * acknowledge the disconnect.
 */
const FLAG_PASSWORD: u8 = 0b0001;
const FLAG_USERNAME: u8 = 0b0010;
const FLAG_DISCONNECT: u8 = 0b0100;

pub trait Encode {
    fn encode(&self) -> Result<Bytes, EncodeError>;
}

impl<T> Encode for Arc<T>
where
    T: Encode,
{
    fn encode(&self) -> Result<Bytes, EncodeError> {
        (**self).encode()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Server,
    Client,
}

impl Origin {
    fn from_byte(byte: u8) -> Self {
        if byte & ORIGIN_BIT == ORIGIN_BIT {
            return Self::Client;
        } else {
            return Self::Server;
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Self::Server => 0,
            Self::Client => ORIGIN_BIT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageKind {
    Connect = 0,
    ConnAck = 1,
    Publish = 2,
    PubAck = 3,
    Subscribe = 4,
    SubAck = 5,
    Unsubscribe = 6,
    UnsubAck = 7,
}

impl TryFrom<u8> for MessageKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => return Ok(Self::Connect),
            1 => return Ok(Self::ConnAck),
            2 => return Ok(Self::Publish),
            3 => return Ok(Self::PubAck),
            4 => return Ok(Self::Subscribe),
            5 => return Ok(Self::SubAck),
            6 => return Ok(Self::Unsubscribe),
            7 => return Ok(Self::UnsubAck),
            _ => Err(DecodeError::new(
                DecodeErrorKind::InvalidMessageType,
                format!("Type code {value} is invalid, only values of 0-7 are valid."),
            )),
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "CONNECT"),
            Self::ConnAck => write!(f, "CONNECTED"),
            Self::Publish => write!(f, "PUBLISH"),
            Self::PubAck => write!(f, "PUBLISHED"),
            Self::Subscribe => write!(f, "SUBSCRIBE"),
            Self::SubAck => write!(f, "SUBSCRIBED"),
            Self::Unsubscribe => write!(f, "UNSUBSCRIBE"),
            Self::UnsubAck => write!(f, "UNSUBSCRIBED"),
        }
    }
}

/// Type-specific message body. Operations that require a field carry it in
/// their variant, so a frame can never be built with a required field
/// missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Connect {
        username: Option<String>,
        password: Option<String>,
        disconnect: bool,
    },
    ConnAck {
        code: AckCode,
        disconnect: bool,
    },
    Publish {
        topic: String,
        body: String,
    },
    PubAck {
        code: AckCode,
    },
    Subscribe {
        topic: String,
    },
    SubAck {
        code: AckCode,
    },
    Unsubscribe {
        topic: String,
    },
    UnsubAck {
        code: AckCode,
    },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Connect { .. } => MessageKind::Connect,
            Self::ConnAck { .. } => MessageKind::ConnAck,
            Self::Publish { .. } => MessageKind::Publish,
            Self::PubAck { .. } => MessageKind::PubAck,
            Self::Subscribe { .. } => MessageKind::Subscribe,
            Self::SubAck { .. } => MessageKind::SubAck,
            Self::Unsubscribe { .. } => MessageKind::Unsubscribe,
            Self::UnsubAck { .. } => MessageKind::UnsubAck,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    version: u16,
    origin: Origin,
    body_length: u32,
    payload: Payload,
}

impl Message {
    pub fn new(origin: Origin, payload: Payload) -> Self {
        return Self {
            version: PROTOCOL_VERSION,
            origin,
            body_length: 0,
            payload,
        };
    }

    pub fn connect(username: Option<String>, password: Option<String>) -> Self {
        return Self::new(
            Origin::Client,
            Payload::Connect {
                username,
                password,
                disconnect: false,
            },
        );
    }

    /// CONNECT with the disconnect bit set: a graceful shutdown request.
    pub fn disconnect_request() -> Self {
        return Self::new(
            Origin::Client,
            Payload::Connect {
                username: None,
                password: None,
                disconnect: true,
            },
        );
    }

    pub fn conn_ack(code: AckCode) -> Self {
        return Self::new(
            Origin::Server,
            Payload::ConnAck {
                code,
                disconnect: false,
            },
        );
    }

    /// CONNECTED with the disconnect bit set, acknowledging a shutdown
    /// request before the server closes the socket.
    pub fn disconnect_ack() -> Self {
        return Self::new(
            Origin::Server,
            Payload::ConnAck {
                code: AckCode::SUCCESS,
                disconnect: true,
            },
        );
    }

    pub fn publish(topic: String, body: String) -> Self {
        return Self::new(Origin::Client, Payload::Publish { topic, body });
    }

    pub fn pub_ack(code: AckCode) -> Self {
        return Self::new(Origin::Server, Payload::PubAck { code });
    }

    pub fn subscribe(topic: String) -> Self {
        return Self::new(Origin::Client, Payload::Subscribe { topic });
    }

    pub fn sub_ack(code: AckCode) -> Self {
        return Self::new(Origin::Server, Payload::SubAck { code });
    }

    pub fn unsubscribe(topic: String) -> Self {
        return Self::new(Origin::Client, Payload::Unsubscribe { topic });
    }

    pub fn unsub_ack(code: AckCode) -> Self {
        return Self::new(Origin::Server, Payload::UnsubAck { code });
    }

    pub fn version(&self) -> u16 {
        return self.version;
    }

    pub fn origin(&self) -> Origin {
        return self.origin;
    }

    /// Rewrites the origin bit. The broker stamps [Origin::Server] on every
    /// copy it fans out to subscribers.
    pub fn set_origin(&mut self, origin: Origin) {
        self.origin = origin;
    }

    pub fn kind(&self) -> MessageKind {
        return self.payload.kind();
    }

    pub fn payload(&self) -> &Payload {
        return &self.payload;
    }

    /// Body length captured at parse time. Locally constructed messages
    /// carry zero until they cross the wire; the encoder derives the field
    /// from the payload itself.
    pub fn body_length(&self) -> u32 {
        return self.body_length;
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;

        match &self.payload {
            Payload::Connect {
                username,
                password,
                disconnect,
            } => {
                if *disconnect {
                    flags |= FLAG_DISCONNECT;
                } else {
                    if username.is_some() {
                        flags |= FLAG_USERNAME;
                    }
                    if password.is_some() {
                        flags |= FLAG_PASSWORD;
                    }
                }
            }
            Payload::ConnAck { disconnect, .. } => {
                if *disconnect {
                    flags |= FLAG_DISCONNECT;
                }
            }
            _ => {}
        }

        return flags;
    }

    pub fn type_byte(&self) -> u8 {
        return self.origin.bit() | (self.payload.kind() as u8) << 4 | self.flags();
    }

    pub fn decode(bytes: &Bytes) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedFrame,
                format!(
                    "Frame of {} bytes is shorter than the {HEADER_LEN} byte header.",
                    bytes.len()
                ),
            ));
        }

        let mut reader = ByteReader::new(bytes.clone());
        let version = reader.read_u16()?;
        let type_byte = reader.read_u8()?;
        let body_length = reader.read_u32()?;

        if reader.remaining() != body_length as usize {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedFrame,
                format!(
                    "Declared body length {body_length} does not match the {} bytes present.",
                    reader.remaining()
                ),
            ));
        }

        // the version field is reserved; tolerate other values but say so
        if version != PROTOCOL_VERSION {
            log::warn!("Decoded frame with reserved version {version} (expected {PROTOCOL_VERSION}).");
        }

        let origin = Origin::from_byte(type_byte);
        let kind = MessageKind::try_from((type_byte & KIND_BITS) >> 4)?;
        let flags = type_byte & FLAG_BITS;

        let payload = match kind {
            MessageKind::Connect => {
                let disconnect = flags & FLAG_DISCONNECT == FLAG_DISCONNECT;
                let mut username = None;
                let mut password = None;

                if !disconnect {
                    if flags & FLAG_USERNAME == FLAG_USERNAME {
                        username = Some(decode_string(&mut reader)?);
                    }
                    if flags & FLAG_PASSWORD == FLAG_PASSWORD {
                        password = Some(decode_string(&mut reader)?);
                    }
                }

                Payload::Connect {
                    username,
                    password,
                    disconnect,
                }
            }
            MessageKind::ConnAck => Payload::ConnAck {
                code: AckCode::from_byte(reader.read_u8()?),
                disconnect: flags & FLAG_DISCONNECT == FLAG_DISCONNECT,
            },
            MessageKind::Publish => Payload::Publish {
                topic: decode_string(&mut reader)?,
                body: decode_string(&mut reader)?,
            },
            MessageKind::PubAck => Payload::PubAck {
                code: AckCode::from_byte(reader.read_u8()?),
            },
            MessageKind::Subscribe => Payload::Subscribe {
                topic: decode_string(&mut reader)?,
            },
            MessageKind::SubAck => Payload::SubAck {
                code: AckCode::from_byte(reader.read_u8()?),
            },
            MessageKind::Unsubscribe => Payload::Unsubscribe {
                topic: decode_string(&mut reader)?,
            },
            MessageKind::UnsubAck => Payload::UnsubAck {
                code: AckCode::from_byte(reader.read_u8()?),
            },
        };

        return Ok(Self {
            version,
            origin,
            body_length,
            payload,
        });
    }
}

impl Encode for Message {
    fn encode(&self) -> Result<Bytes, EncodeError> {
        let mut body = BytesMut::new();

        match &self.payload {
            Payload::Connect {
                username,
                password,
                disconnect,
            } => {
                if !disconnect {
                    if let Some(username) = username {
                        encode_string(&mut body, username)?;
                    }
                    if let Some(password) = password {
                        encode_string(&mut body, password)?;
                    }
                }
            }
            Payload::ConnAck { code, .. } => {
                body.put_u8(code.as_byte());
            }
            Payload::Publish { topic, body: text } => {
                encode_string(&mut body, topic)?;
                encode_string(&mut body, text)?;
            }
            Payload::PubAck { code } | Payload::SubAck { code } | Payload::UnsubAck { code } => {
                body.put_u8(code.as_byte());
            }
            Payload::Subscribe { topic } | Payload::Unsubscribe { topic } => {
                encode_string(&mut body, topic)?;
            }
        }

        if body.len() > u32::MAX as usize {
            return Err(EncodeError::new(
                EncodeErrorKind::OversizedBody,
                format!("Body of {} bytes exceeds the 32-bit length field.", body.len()),
            ));
        }

        let mut bytes = BytesMut::with_capacity(HEADER_LEN + body.len());
        bytes.put_u16(self.version);
        bytes.put_u8(self.type_byte());
        bytes.put_u32(body.len() as u32);
        bytes.put_slice(&body);

        return Ok(bytes.into());
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "v{} {:?} {} ({} byte body)",
            self.version,
            self.origin,
            self.kind(),
            self.body_length
        )
    }
}

fn encode_string(bytes: &mut BytesMut, val: &str) -> Result<(), EncodeError> {
    if val.len() > u16::MAX as usize {
        return Err(EncodeError::new(
            EncodeErrorKind::OversizedString,
            format!(
                "String of {} bytes exceeds the 16-bit length prefix.",
                val.len()
            ),
        ));
    }

    bytes.put_u16(val.len() as u16);
    bytes.put_slice(val.as_bytes());

    return Ok(());
}

fn decode_string(reader: &mut ByteReader) -> Result<String, DecodeError> {
    let len = reader.read_u16()?;
    let raw = reader.read_exact(len as usize)?;

    match String::from_utf8(raw.to_vec()) {
        Ok(string) => return Ok(string),
        Err(e) => {
            return Err(DecodeError::new(
                DecodeErrorKind::InvalidUtf8,
                e.to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod message {
    use bytes::Bytes;

    use super::{Encode, Message, MessageKind, Origin, Payload};
    use crate::err::DecodeErrorKind;
    use crate::AckCode;

    fn roundtrip(message: Message) -> Message {
        let bytes = message.encode().expect("Could not encode message");
        let decoded = Message::decode(&bytes).expect("Could not decode message");
        assert_eq!(decoded, {
            let mut message = message;
            message.body_length = bytes.len() as u32 - super::HEADER_LEN as u32;
            message
        });
        return decoded;
    }

    #[test]
    fn serialize_anonymous_connect() {
        let bytes = Message::connect(None, None).encode().unwrap();
        assert_eq!(&bytes[..], b"\x00\x00\x80\x00\x00\x00\x00");
    }

    #[test]
    fn serialize_connect_with_credentials() {
        let message = Message::connect(Some(String::from("User")), Some(String::from("Pwd")));
        let bytes = message.encode().unwrap();

        assert_eq!(
            &bytes[..],
            b"\x00\x00\x83\x00\x00\x00\x0b\x00\x04User\x00\x03Pwd"
        );

        roundtrip(message);
    }

    #[test]
    fn serialize_connect_ack() {
        let bytes = Message::conn_ack(AckCode::SUCCESS).encode().unwrap();
        assert_eq!(&bytes[..], b"\x00\x00\x10\x00\x00\x00\x01\x00");

        let bytes = Message::conn_ack(AckCode::REFUSED).encode().unwrap();
        assert_eq!(&bytes[..], b"\x00\x00\x10\x00\x00\x00\x01\x81");
    }

    #[test]
    fn serialize_disconnect() {
        let bytes = Message::disconnect_request().encode().unwrap();
        assert_eq!(&bytes[..], b"\x00\x00\x84\x00\x00\x00\x00");

        let bytes = Message::disconnect_ack().encode().unwrap();
        assert_eq!(&bytes[..], b"\x00\x00\x14\x00\x00\x00\x01\x00");
    }

    #[test]
    fn serialize_publish() {
        let message = Message::publish(String::from("."), String::from("Body"));
        let bytes = message.encode().unwrap();

        assert_eq!(
            &bytes[..],
            b"\x00\x00\xa0\x00\x00\x00\x09\x00\x01.\x00\x04Body"
        );
    }

    #[test]
    fn serialize_subscribe() {
        let message = Message::subscribe(String::from("."));
        let bytes = message.encode().unwrap();

        assert_eq!(&bytes[..], b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01.");
    }

    #[test]
    fn origin_rewrite() {
        let mut message = Message::publish(String::from("."), String::from("Body"));
        message.set_origin(Origin::Server);

        let bytes = message.encode().unwrap();
        assert_eq!(
            &bytes[..],
            b"\x00\x00\x20\x00\x00\x00\x09\x00\x01.\x00\x04Body"
        );
    }

    #[test]
    fn roundtrip_all_kinds() {
        roundtrip(Message::connect(None, None));
        roundtrip(Message::connect(Some(String::from("u")), None));
        roundtrip(Message::connect(None, Some(String::from("p"))));
        roundtrip(Message::disconnect_request());
        roundtrip(Message::conn_ack(AckCode::SUCCESS));
        roundtrip(Message::disconnect_ack());
        roundtrip(Message::publish(String::from("a/b"), String::from("hello")));
        roundtrip(Message::pub_ack(AckCode::REFUSED));
        roundtrip(Message::subscribe(String::from("a/.*")));
        roundtrip(Message::sub_ack(AckCode::NO_OP));
        roundtrip(Message::unsubscribe(String::from("a/.*")));
        roundtrip(Message::unsub_ack(AckCode::SUCCESS));
    }

    #[test]
    fn reencode_is_identity() {
        let frames: &[&[u8]] = &[
            b"\x00\x00\x80\x00\x00\x00\x00",
            b"\x00\x00\x83\x00\x00\x00\x0b\x00\x04User\x00\x03Pwd",
            b"\x00\x00\x10\x00\x00\x00\x01\x00",
            b"\x00\x00\x14\x00\x00\x00\x01\x00",
            b"\x00\x00\xa0\x00\x00\x00\x09\x00\x01.\x00\x04Body",
            b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01.",
            b"\x00\x00\x50\x00\x00\x00\x01\x00",
        ];

        for frame in frames {
            let bytes = Bytes::copy_from_slice(frame);
            let message = Message::decode(&bytes).expect("Could not decode frame");
            assert_eq!(message.encode().unwrap(), bytes);
        }
    }

    #[test]
    fn zero_length_strings() {
        let bytes = Bytes::copy_from_slice(b"\x00\x00\xa0\x00\x00\x00\x04\x00\x00\x00\x00");
        let message = Message::decode(&bytes).unwrap();

        assert_eq!(
            message.payload(),
            &Payload::Publish {
                topic: String::new(),
                body: String::new(),
            }
        );
    }

    #[test]
    fn decode_short_input() {
        let bytes = Bytes::copy_from_slice(b"\x00\x00\x80");
        let err = Message::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::MalformedFrame);
    }

    #[test]
    fn decode_truncated_body() {
        // declares an 11 byte body but carries 3
        let bytes = Bytes::copy_from_slice(b"\x00\x00\x83\x00\x00\x00\x0b\x00\x04U");
        let err = Message::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::MalformedFrame);
    }

    #[test]
    fn decode_string_past_body_end() {
        // topic length prefix claims 9 bytes, body only has 1 left
        let bytes = Bytes::copy_from_slice(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x09.");
        let err = Message::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::MalformedString);
    }

    #[test]
    fn decode_invalid_utf8() {
        let bytes = Bytes::copy_from_slice(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01\xff");
        let err = Message::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::InvalidUtf8);
    }

    #[test]
    fn decode_nonzero_version() {
        let bytes = Bytes::copy_from_slice(b"\x00\x07\x80\x00\x00\x00\x00");
        let message = Message::decode(&bytes).unwrap();
        assert_eq!(message.version(), 7);
        assert_eq!(message.kind(), MessageKind::Connect);
    }

    #[test]
    fn invalid_kind_code() {
        assert!(MessageKind::try_from(8).is_err());
        assert_eq!(MessageKind::try_from(5).unwrap(), MessageKind::SubAck);
    }
}
