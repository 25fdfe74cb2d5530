use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::err::{DecodeError, DecodeErrorKind};
use crate::{Message, HEADER_LEN};

/// Upper bound on the declared body length. A header above this is treated
/// as a malformed frame and the connection can no longer be assumed
/// frame-aligned, so the caller drops the session.
pub const MAX_BODY_LEN: u32 = 16 * 1024 * 1024;

/// Reads one framed message off a stream in the protocol's two stages:
/// exactly [HEADER_LEN] bytes first, then exactly the declared body length
/// (skipped when zero), handing the assembled frame to the decoder.
///
/// Returns `Ok(None)` when the peer closed the stream at a frame boundary.
/// EOF inside a frame surfaces as an I/O error.
pub async fn read_message<S, E>(stream: &mut S) -> Result<Option<Message>, E>
where
    S: AsyncRead + Unpin,
    E: From<DecodeError> + From<std::io::Error>,
{
    let mut header = [0u8; HEADER_LEN];

    let n = stream.read(&mut header[..1]).await?;
    if n == 0 {
        return Ok(None);
    }

    stream.read_exact(&mut header[1..]).await?;

    let body_length = u32::from_be_bytes([header[3], header[4], header[5], header[6]]);

    if body_length > MAX_BODY_LEN {
        return Err(DecodeError::new(
            DecodeErrorKind::OversizedBody,
            format!("Declared body length {body_length} exceeds the {MAX_BODY_LEN} byte cap."),
        )
        .into());
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body_length as usize);
    frame.extend_from_slice(&header);

    if body_length > 0 {
        frame.resize(HEADER_LEN + body_length as usize, 0);
        stream.read_exact(&mut frame[HEADER_LEN..]).await?;
    }

    let message = Message::decode(&frame.freeze())?;

    return Ok(Some(message));
}
