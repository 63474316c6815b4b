pub mod decoder;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::BackendConfig;
use crate::model::{Attachment, Problem, Source};

use decoder::{Frame, FrameDecoder};

/// Shared cooperative cancellation handle. The transport observes it
/// between reads, never mid-decode.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What the session consumes. `Delta` carries the cumulative text, not
/// the wire delta; the transport does the accumulation.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Started {
        sources: Vec<Source>,
    },
    Delta {
        content: String,
        charged_remaining: Option<u32>,
    },
    Finished {
        content: String,
        final_answer: Option<String>,
        confidence: Option<u8>,
        charged_remaining: Option<u32>,
    },
    Failed {
        message: String,
    },
    Aborted,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Finished { .. } | StreamEvent::Failed { .. } | StreamEvent::Aborted
        )
    }
}

/// Explicit pull iterator over one response stream.
pub trait ProblemStream: Send {
    /// Next event in arrival order; `Ok(None)` once the stream is
    /// exhausted.
    fn next(&mut self) -> BoxFuture<'_, Result<Option<StreamEvent>>>;
}

/// Opens a cancellable streaming request for one problem.
pub trait Transport: Send + Sync {
    fn open<'a>(
        &'a self,
        problem: &'a Problem,
        token: Option<&'a str>,
        cancel: CancelFlag,
    ) -> BoxFuture<'a, Result<Box<dyn ProblemStream>>>;
}

#[derive(Serialize)]
struct AskRequest<'a> {
    text: &'a str,
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<&'a Attachment>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// Chunked-HTTP transport against the inference backend.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
        }
    }
}

impl Transport for HttpTransport {
    fn open<'a>(
        &'a self,
        problem: &'a Problem,
        token: Option<&'a str>,
        cancel: CancelFlag,
    ) -> BoxFuture<'a, Result<Box<dyn ProblemStream>>> {
        Box::pin(async move {
            let url = format!("{}/ask-stream", self.base_url);
            let mut request = self.client.post(&url).json(&AskRequest {
                text: &problem.text,
                user_id: &problem.user_id,
                attachment: problem.attachment.as_ref(),
            });
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .context("request to inference backend failed")?;

            let status = response.status();
            if !status.is_success() {
                let detail = response
                    .json::<ErrorBody>()
                    .await
                    .ok()
                    .and_then(|body| body.detail);
                let message =
                    detail.unwrap_or_else(|| format!("API error: {}", status.as_u16()));
                return Err(anyhow::anyhow!(message));
            }

            info!(problem_id = problem.id.as_str(), "stream opened");

            Ok(Box::new(HttpStream {
                response,
                decoder: FrameDecoder::new(),
                assembler: EventAssembler::default(),
                cancel,
            }) as Box<dyn ProblemStream>)
        })
    }
}

/// Turns decoded frames into session events. Chunk deltas are folded into
/// a running cumulative text, an end frame's `text` replaces it outright,
/// and everything past the first terminal event (late frames) is dropped.
#[derive(Default)]
struct EventAssembler {
    content: String,
    pending: VecDeque<StreamEvent>,
    done: bool,
}

impl EventAssembler {
    fn absorb(&mut self, frame: Frame) {
        if self.done {
            return;
        }
        match frame {
            Frame::Start { sources } => {
                self.pending.push_back(StreamEvent::Started { sources });
            }
            Frame::Chunk {
                text,
                charged_remaining,
            } => {
                self.content.push_str(&text);
                self.pending.push_back(StreamEvent::Delta {
                    content: self.content.clone(),
                    charged_remaining,
                });
            }
            Frame::End {
                text,
                final_answer,
                confidence,
                charged_remaining,
            } => {
                if let Some(full) = text {
                    self.content = full;
                }
                self.pending.push_back(StreamEvent::Finished {
                    content: self.content.clone(),
                    final_answer,
                    confidence,
                    charged_remaining,
                });
            }
            Frame::Error { error } => {
                self.pending.push_back(StreamEvent::Failed { message: error });
            }
        }
    }

    fn next_event(&mut self) -> Option<StreamEvent> {
        if self.done {
            return None;
        }
        let event = self.pending.pop_front()?;
        if event.is_terminal() {
            self.done = true;
            self.pending.clear();
        }
        Some(event)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn abort(&mut self) -> StreamEvent {
        self.done = true;
        self.pending.clear();
        StreamEvent::Aborted
    }

    fn exhaust(&mut self) {
        self.done = true;
    }
}

struct HttpStream {
    response: reqwest::Response,
    decoder: FrameDecoder,
    assembler: EventAssembler,
    cancel: CancelFlag,
}

impl ProblemStream for HttpStream {
    fn next(&mut self) -> BoxFuture<'_, Result<Option<StreamEvent>>> {
        Box::pin(async move {
            loop {
                if let Some(event) = self.assembler.next_event() {
                    return Ok(Some(event));
                }
                if self.assembler.is_done() {
                    return Ok(None);
                }
                if self.cancel.is_cancelled() {
                    return Ok(Some(self.assembler.abort()));
                }
                match self.response.chunk().await? {
                    Some(bytes) => {
                        for frame in self.decoder.push(&bytes) {
                            self.assembler.absorb(frame);
                        }
                    }
                    None => {
                        if let Some(frame) = self.decoder.finish() {
                            self.assembler.absorb(frame);
                        }
                        if !self.assembler.has_pending() {
                            self.assembler.exhaust();
                            return Ok(None);
                        }
                    }
                }
            }
        })
    }
}
