//! Message-boundary detection over the decoded h1 element stream.
//!
//! The codec turns the byte stream into heads, body chunks and trailing
//! headers; the boundary predicate classifies which element is the last one
//! of the current logical message so the stream can be chopped into whole
//! request/response units. Fixed-length bodies carry their own end marker in
//! the decoder, so the predicate arbitrates the streamed path, where a
//! trailing-headers block (possibly empty) is always the final element.

use bytes::Bytes;
use http::{HeaderMap, Request, Response};
use monoio::io::{sink::Sink, stream::Stream, AsyncReadRent, AsyncWriteRent};
use monoio_http::{
    common::{
        body::{Body, HttpBody},
        error::HttpError,
    },
    h1::{
        codec::{decoder::PayloadDecoder, ClientCodec},
        payload::{fixed_payload_pair, stream_payload_pair, Payload},
    },
};

use crate::error::ConnError;

/// One decoded element of a logical HTTP message.
pub enum MessageElement<'a> {
    /// Status line plus headers.
    Head(&'a http::response::Parts),
    /// One chunk of body data.
    Data(&'a Bytes),
    /// Trailing headers block. Synthesized empty when the wire had none.
    Trailers(&'a HeaderMap),
}

/// Classifies whether an element is the last one of the current message.
/// Must be stateless and side-effect-free; it is supplied once per
/// connection and consulted for every message.
pub type MessageBoundary = fn(&MessageElement<'_>) -> bool;

/// The HTTP rule: the trailing-headers block is the final element of every
/// message, whether or not the peer actually sent trailers.
#[inline]
pub fn trailers_end_message(element: &MessageElement<'_>) -> bool {
    matches!(element, MessageElement::Trailers(_))
}

pub(crate) struct MessageFramer<IO: AsyncWriteRent> {
    codec: ClientCodec<IO>,
    boundary: MessageBoundary,
}

impl<IO: AsyncReadRent + AsyncWriteRent> MessageFramer<IO>
where
    ClientCodec<IO>: Sink<Request<HttpBody>>,
    <ClientCodec<IO> as Sink<Request<HttpBody>>>::Error: Into<HttpError>,
{
    pub(crate) fn new(codec: ClientCodec<IO>, boundary: MessageBoundary) -> Self {
        Self { codec, boundary }
    }

    pub(crate) async fn write_request(&mut self, request: Request<HttpBody>) -> Result<(), ConnError> {
        self.codec
            .send(request)
            .await
            .map_err(|e| ConnError::Http(e.into()))
    }

    pub(crate) async fn flush(&mut self) -> Result<(), ConnError> {
        Sink::<Request<HttpBody>>::flush(&mut self.codec)
            .await
            .map_err(|e| ConnError::Http(e.into()))
    }

    /// Read the next whole message off the stream, running every decoded
    /// element through the boundary predicate. `None` means the peer closed
    /// the stream between messages.
    pub(crate) async fn next_message(&mut self) -> Option<Result<Response<HttpBody>, ConnError>> {
        let boundary = self.boundary;
        let resp = match self.codec.next().await {
            Some(Ok(resp)) => resp,
            Some(Err(e)) => return Some(Err(e.into())),
            None => return None,
        };
        let (parts, payload_decoder) = resp.into_parts();
        if boundary(&MessageElement::Head(&parts)) {
            let response = Response::from_parts(parts, Payload::None.into());
            return Some(Ok(response));
        }
        match payload_decoder {
            PayloadDecoder::None => {
                let payload = Payload::None;
                let response = Response::from_parts(parts, payload.into());
                Some(Ok(response))
            }
            PayloadDecoder::Fixed(_) => {
                let mut framed_payload = payload_decoder.with_io(&mut self.codec);
                let (payload, payload_sender) = fixed_payload_pair();
                if let Some(data) = framed_payload.next_data().await {
                    payload_sender.feed(data)
                }
                let payload = Payload::Fixed(payload);
                let response = Response::from_parts(parts, payload.into());
                Some(Ok(response))
            }
            PayloadDecoder::Streamed(_) => {
                let mut framed_payload = payload_decoder.with_io(&mut self.codec);
                let (payload, mut payload_sender) = stream_payload_pair();
                let trailers = HeaderMap::new();
                loop {
                    let end = match framed_payload.next_data().await {
                        Some(Ok(data)) => {
                            let end = boundary(&MessageElement::Data(&data));
                            payload_sender.feed_data(Some(data));
                            end
                        }
                        Some(Err(e)) => return Some(Err(e.into())),
                        None => {
                            let end = boundary(&MessageElement::Trailers(&trailers));
                            payload_sender.feed_data(None);
                            end
                        }
                    };
                    if end {
                        break;
                    }
                }
                let payload = Payload::Stream(payload);
                let response = Response::from_parts(parts, payload.into());
                Some(Ok(response))
            }
        }
    }

    /// Shut down the write side. Read errors after this are expected and
    /// ignored by the caller.
    pub(crate) async fn close(&mut self) -> Result<(), ConnError> {
        Sink::<Request<HttpBody>>::close(&mut self.codec)
            .await
            .map_err(|e| ConnError::Http(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailers_are_the_boundary() {
        let trailers = HeaderMap::new();
        assert!(trailers_end_message(&MessageElement::Trailers(&trailers)));
    }

    #[test]
    fn heads_and_data_are_not_boundaries() {
        let data = Bytes::from_static(b"chunk");
        assert!(!trailers_end_message(&MessageElement::Data(&data)));
        let (parts, _) = Response::new(()).into_parts();
        assert!(!trailers_end_message(&MessageElement::Head(&parts)));
    }
}
