//! HTTP body wrapper shared by buffered and streaming responses.
//!
//! `CloakBody` unifies the body shapes the proxy produces: small JSON error
//! bodies, buffered upstream responses, and server-sent event streams whose
//! chunks are produced incrementally by the deanonymizing stream buffer. It
//! wraps Hyper's body system behind a boxed type so handlers can return any
//! of these shapes through one signature.
//!
//! # Examples
//!
//! ```rust
//! use cloak::body::CloakBody;
//! use bytes::Bytes;
//! use futures_util::stream;
//!
//! // Buffered content
//! let json = CloakBody::from(r#"{"status":"ok"}"#.to_string());
//!
//! // Streaming content
//! let chunks = stream::iter(vec![
//!     Ok::<_, std::convert::Infallible>(Bytes::from("data: {}\n\n")),
//! ]);
//! let streamed = CloakBody::from_stream(chunks);
//!
//! // No content
//! let empty = CloakBody::empty();
//! ```

use std::{
    fmt::Debug,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Body, Frame, SizeHint};

use crate::types::{BoxBody, BoxError};

/// Unified HTTP body for proxy responses.
pub struct CloakBody(BoxBody);

impl CloakBody {
    /// Creates a new body from any type implementing the `Body` trait.
    pub fn new<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(|e| e.into()).boxed_unsync())
    }

    /// Creates a body from a stream of byte results.
    ///
    /// Each stream item becomes one data frame. This is how the streaming
    /// branch of the pipeline turns restored event frames into a response
    /// body without buffering the whole stream.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + Debug + 'static,
    {
        let stream = stream.map_err(Into::into).map_ok(Frame::data);
        let body = StreamBody::new(stream).boxed_unsync();
        Self(body)
    }

    /// Creates an empty body with no content.
    pub fn empty() -> Self {
        Self::new(Empty::new())
    }
}

impl Default for CloakBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<()> for CloakBody {
    fn from(_: ()) -> Self {
        Self::empty()
    }
}

impl From<&str> for CloakBody {
    fn from(buf: &str) -> Self {
        let owned = buf.to_owned();
        Self::new(http_body_util::Full::from(owned))
    }
}

macro_rules! body_from_impl {
    ($ty:ty) => {
        impl From<$ty> for CloakBody {
            fn from(buf: $ty) -> Self {
                Self::new(http_body_util::Full::from(buf))
            }
        }
    };
}

body_from_impl!(String);
body_from_impl!(Vec<u8>);
body_from_impl!(Bytes);

impl Body for CloakBody {
    type Data = Bytes;
    type Error = BoxError;

    #[inline]
    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    #[inline]
    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }
}
