// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Framed NTS-KE message I/O over a TLS stream.
//!
//! Writes resume from the message's `sent` cursor across partial writes;
//! reads append to the buffer until record-level validation decides the
//! message is complete or can never become valid.

use std::io;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::KeError;
use crate::record::{KeMessage, MessageFormat};

/// Write the unsent part of `message` to the stream, advancing the `sent`
/// cursor until the whole message is out.
pub(crate) async fn send_message<S>(stream: &mut S, message: &mut KeMessage) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    while !message.fully_sent() {
        let n = stream.write(message.unsent()).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "TLS stream closed mid-message",
            ));
        }
        debug!("sent {n} bytes");
        message.advance_sent(n);
    }
    stream.flush().await
}

/// Read from the stream into `message` until a complete message validates.
///
/// Returns an error when the peer closes mid-message, the framing is
/// invalid, or the message would exceed the buffer capacity.
pub(crate) async fn receive_message<S>(stream: &mut S, message: &mut KeMessage) -> io::Result<()>
where
    S: AsyncRead + Unpin,
{
    loop {
        match message.validate() {
            MessageFormat::Ok => return Ok(()),
            MessageFormat::Error if message.is_empty() && !message.eof() => {
                // Nothing received yet; keep reading.
            }
            MessageFormat::Error => return Err(KeError::MalformedMessage.into()),
            MessageFormat::Incomplete => {}
        }

        if message.is_full() {
            debug!("message exceeds buffer capacity");
            return Err(KeError::MalformedMessage.into());
        }

        let n = stream.read(message.unfilled()).await?;
        if n == 0 {
            message.mark_eof();
        } else {
            debug!("received {n} bytes");
            message.advance_filled(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RECORD_END_OF_MESSAGE, RECORD_NEXT_PROTOCOL};

    #[tokio::test]
    async fn test_send_receive_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let mut out = KeMessage::new();
        out.add_record(true, RECORD_NEXT_PROTOCOL, &[0x00, 0x00]).unwrap();
        out.add_record(true, RECORD_END_OF_MESSAGE, &[]).unwrap();

        let send = async {
            send_message(&mut client, &mut out).await.unwrap();
            drop(client);
        };

        let mut incoming = KeMessage::new();
        let recv = receive_message(&mut server, &mut incoming);

        let (_, recv_result) = tokio::join!(send, recv);
        recv_result.unwrap();

        incoming.reset_parsing();
        let record = incoming.next_record().unwrap();
        assert_eq!(record.record_type, RECORD_NEXT_PROTOCOL);
    }

    #[tokio::test]
    async fn test_receive_rejects_truncated_message() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Critical Next Protocol without End of Message, then EOF.
        let partial = [0x80, 0x01, 0x00, 0x02, 0x00, 0x00];
        let send = async {
            client.write_all(&partial).await.unwrap();
            drop(client);
        };

        let mut incoming = KeMessage::new();
        let recv = receive_message(&mut server, &mut incoming);

        let (_, recv_result) = tokio::join!(send, recv);
        assert!(recv_result.is_err());
    }

    #[tokio::test]
    async fn test_receive_rejects_immediate_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let mut incoming = KeMessage::new();
        assert!(receive_message(&mut server, &mut incoming).await.is_err());
    }

    #[tokio::test]
    async fn test_send_resumes_across_small_writes() {
        // A 16-byte duplex forces several partial writes.
        let (mut client, mut server) = tokio::io::duplex(16);

        let mut out = KeMessage::new();
        out.add_record(false, crate::record::RECORD_COOKIE, &[0xAB; 100]).unwrap();
        out.add_record(true, RECORD_END_OF_MESSAGE, &[]).unwrap();

        let send = async {
            send_message(&mut client, &mut out).await.unwrap();
            drop(client);
        };

        let mut incoming = KeMessage::new();
        let recv = receive_message(&mut server, &mut incoming);

        let (_, recv_result) = tokio::join!(send, recv);
        recv_result.unwrap();

        incoming.reset_parsing();
        let record = incoming.next_record().unwrap();
        assert_eq!(record.body, &[0xAB; 100][..]);
    }
}
