//! Cursor iteration as a `futures::Stream`
//!
//! The `success` event of a cursor request fires once per record and once
//! more with a `null` result at the end. The success handler copies the
//! record out and calls `continue()` right away, so the cursor runs to the
//! end inside its transaction whether or not the stream is being polled.
//! Records are buffered in a channel until the consumer takes them.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::stream::Stream;
use objstore_core::{Record, StoreResult};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, IdbCursorWithValue, IdbRequest};

use crate::convert::{key_from_js, value_from_js};
use crate::error::IndexedDbError;

enum CursorEvent {
    Record { key: JsValue, value: JsValue },
    Done,
    Failed(JsValue),
}

pub struct CursorStream {
    request: IdbRequest,
    receiver: mpsc::UnboundedReceiver<CursorEvent>,
    done: bool,
    _callbacks: (Closure<dyn FnMut(Event)>, Closure<dyn FnMut(Event)>),
}

/// Copy the current record out of the cursor and move it forward.
fn step(cursor: &IdbCursorWithValue) -> Result<CursorEvent, JsValue> {
    let key = cursor.primary_key()?;
    let value = cursor.value()?;
    cursor.continue_()?;
    Ok(CursorEvent::Record { key, value })
}

impl CursorStream {
    /// Attach to a request returned by `openCursor()`.
    pub fn new(request: IdbRequest) -> Self {
        let (sender, receiver) = mpsc::unbounded();

        let on_success = {
            let sender = sender.clone();
            let request = request.clone();
            Closure::wrap(Box::new(move |_event: Event| {
                let result = request.result().unwrap_or(JsValue::NULL);
                let event = if result.is_null() || result.is_undefined() {
                    CursorEvent::Done
                } else {
                    step(result.unchecked_ref()).unwrap_or_else(CursorEvent::Failed)
                };
                let _ = sender.unbounded_send(event);
            }) as Box<dyn FnMut(Event)>)
        };

        let on_error = {
            let request = request.clone();
            Closure::wrap(Box::new(move |_event: Event| {
                let err = request
                    .error()
                    .ok()
                    .flatten()
                    .map(JsValue::from)
                    .unwrap_or_else(|| JsValue::from_str("cursor error"));
                let _ = sender.unbounded_send(CursorEvent::Failed(err));
            }) as Box<dyn FnMut(Event)>)
        };

        request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        request.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        Self {
            request,
            receiver,
            done: false,
            _callbacks: (on_success, on_error),
        }
    }
}

impl Stream for CursorStream {
    type Item = StoreResult<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.receiver).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) | Poll::Ready(Some(CursorEvent::Done)) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(CursorEvent::Failed(err))) => {
                self.done = true;
                Poll::Ready(Some(Err(IndexedDbError::from(err).into())))
            }
            Poll::Ready(Some(CursorEvent::Record { key, value })) => {
                let record = key_from_js(&key).and_then(|key| {
                    Ok(Record {
                        key,
                        value: value_from_js(value)?,
                    })
                });
                if record.is_err() {
                    self.done = true;
                }
                Poll::Ready(Some(record))
            }
        }
    }
}

impl Drop for CursorStream {
    fn drop(&mut self) {
        self.request.set_onsuccess(None);
        self.request.set_onerror(None);
    }
}
