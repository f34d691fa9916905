use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CaptureError;
use crate::wire::header::{FrameHeader, HEADER_SIZE};
use crate::wire::message::WireMessage;

/// `tokio_util` codec for [`WireMessage`] frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpdateCodec;

impl Decoder for UpdateCodec {
    type Item = WireMessage;
    type Error = CaptureError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&src[..HEADER_SIZE]);
        let header = FrameHeader::from_bytes(&raw)?;

        let frame_len = HEADER_SIZE + header.body_length as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(header.body_length as usize);
        header.verify(&body)?;
        WireMessage::from_body(&body).map(Some)
    }
}

impl Encoder<WireMessage> for UpdateCodec {
    type Error = CaptureError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_body()?;
        let header = FrameHeader::for_body(&body)?;
        dst.reserve(HEADER_SIZE + body.len());
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
