//! Shared fakes for exercising protocols without a bridge process.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::dispatch::BleDispatcher;
use crate::errors::TransportError;
use crate::msg::{self, MsgOp, MsgType, Seq};
use crate::transport::Transmit;

/// Link that answers each transmitted request with a canned batch of records.
///
/// Records without a `seq` key inherit the request's sequence number; records
/// that already carry one (including `null`) are dispatched unchanged.
/// Requests beyond the end of the script go unanswered.
pub struct ScriptedLink {
    dispatcher: Arc<BleDispatcher>,
    script: Mutex<VecDeque<Vec<Value>>>,
    sent: Mutex<Vec<Value>>,
}

impl ScriptedLink {
    pub fn new(dispatcher: Arc<BleDispatcher>) -> Self {
        Self {
            dispatcher,
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queues the records answering the next unanswered request.
    pub fn reply(&self, records: Vec<Value>) -> &Self {
        self.script.lock().expect("script lock").push_back(records);
        self
    }

    /// Requests transmitted so far, parsed back into JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl Transmit for ScriptedLink {
    fn tx(&self, payload: &[u8]) -> Result<(), TransportError> {
        let request: Value = serde_json::from_slice(payload).expect("request is JSON");
        let seq = msg::decode_base(payload)
            .expect("request header decodes")
            .seq
            .expect("request carries seq");
        self.sent.lock().expect("sent lock").push(request);

        let records = self.script.lock().expect("script lock").pop_front();
        for mut record in records.unwrap_or_default() {
            if let Value::Object(fields) = &mut record {
                fields.entry("seq").or_insert(json!(seq));
            }
            let bytes = serde_json::to_vec(&record).expect("record encodes");
            self.dispatcher.dispatch(&bytes);
        }
        Ok(())
    }
}

/// Link whose every transmission fails.
pub struct BrokenLink;

impl Transmit for BrokenLink {
    fn tx(&self, _payload: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "bridge stdin closed",
        )))
    }
}

/// Status-only acknowledgement of a `ty` request.
pub fn ack(ty: MsgType, status: i32) -> Value {
    json!({ "op": MsgOp::Response.code(), "type": ty.code(), "status": status })
}

/// Event record of type `ty` with extra body fields.
pub fn event(ty: MsgType, body: Value) -> Value {
    let mut record = json!({ "op": MsgOp::Event.code(), "type": ty.code() });
    if let (Value::Object(target), Value::Object(fields)) = (&mut record, body) {
        target.extend(fields);
    }
    record
}

/// Raw bytes of a record addressed to `seq`.
pub fn record_bytes(mut record: Value, seq: Seq) -> Vec<u8> {
    if let Value::Object(fields) = &mut record {
        fields.insert("seq".to_string(), json!(seq));
    }
    serde_json::to_vec(&record).expect("record encodes")
}
