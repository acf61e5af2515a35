//! Scripted Threshold Signer
//!
//! Each submission consumes one script: the sequence of answers its status polls
//! receive. Unscripted submissions sign immediately with a low-S signature.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::Result;
use crate::sign::{SignRequest, SignStatus, ThresholdSigner};

/// A submitted sign request as seen by the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedSign {
    pub pubkey: String,
    pub input_code: Option<String>,
    pub msg_hash: String,
    pub msg_context: String,
}

#[derive(Default)]
pub struct MockThresholdSigner {
    scripts: Mutex<VecDeque<Vec<Result<SignStatus>>>>,
    active: Mutex<HashMap<String, VecDeque<Result<SignStatus>>>>,
    submissions: Mutex<Vec<SubmittedSign>>,
    polls: AtomicUsize,
}

impl MockThresholdSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Low-S `rsv` returned by unscripted submissions.
    pub fn default_rsv() -> String {
        let mut rsv = [0x11u8; 65];
        rsv[32] = 0x10;
        rsv[64] = 0;
        hex::encode(rsv)
    }

    /// Queue the poll answers for the next submission.
    pub fn push_outcome(&self, script: Vec<Result<SignStatus>>) {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(script);
    }

    pub fn submit_count(&self) -> usize {
        self.submissions.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<SubmittedSign> {
        self.submissions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl ThresholdSigner for MockThresholdSigner {
    async fn submit_sign(
        &self,
        pubkey: &str,
        input_code: Option<&str>,
        msg_hash: &str,
        msg_context: &str,
    ) -> Result<SignRequest> {
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| vec![Ok(SignStatus::Done(vec![Self::default_rsv()]))]);

        let key_id = {
            let mut submissions = self.submissions.lock().unwrap_or_else(|p| p.into_inner());
            submissions.push(SubmittedSign {
                pubkey: pubkey.to_string(),
                input_code: input_code.map(String::from),
                msg_hash: msg_hash.to_string(),
                msg_context: msg_context.to_string(),
            });
            format!("mock-key-{}", submissions.len())
        };
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key_id.clone(), script.into());
        Ok(SignRequest {
            key_id,
            rpc_addr: "mock://signer".to_string(),
        })
    }

    async fn poll_status(&self, request: &SignRequest) -> Result<SignStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        match active.get_mut(&request.key_id).and_then(VecDeque::pop_front) {
            Some(answer) => answer,
            None => Ok(SignStatus::Pending),
        }
    }

    async fn bip32_child_key(&self, root_pubkey: &str, input_code: &str) -> Result<String> {
        let digest = Sha256::digest(format!("{}/{}", root_pubkey, input_code));
        Ok(format!("02{}", hex::encode(digest)))
    }
}
