use serde::{Deserialize, Serialize};

use crate::{Result, SwapError};

/// These are the request "commands" that can be made to a key/value store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// check that the store is reachable
    Ping,
    /// get a value from the store
    Get {
        /// the key to search for
        key: String,
    },
    /// set a key/value in the store
    Set {
        /// the key to set
        key: String,
        /// the value to set
        value: String,
    },
    /// remove a key (string or set) from the store
    Remove {
        /// the key to remove
        key: String,
    },
    /// add a member to the set stored at `key`
    SetAdd {
        /// the set key
        key: String,
        /// the member to add
        member: String,
    },
    /// remove a member from the set stored at `key`
    SetRemove {
        /// the set key
        key: String,
        /// the member to remove
        member: String,
    },
    /// all members of the set stored at `key`
    SetMembers {
        /// the set key
        key: String,
    },
    /// number of members in the set stored at `key`
    SetCard {
        /// the set key
        key: String,
    },
    /// whether `member` belongs to the set stored at `key`
    SetIsMember {
        /// the set key
        key: String,
        /// the member to test
        member: String,
    },
    /// every key matching a glob `pattern`
    Keys {
        /// glob pattern, e.g. `user:*:listings`
        pattern: String,
    },
    /// set `key` to `value` only if its current value equals `expected`
    /// (`None` meaning the key must be absent)
    CompareAndSwap {
        /// the key to update
        key: String,
        /// the value the caller last read
        expected: Option<String>,
        /// the replacement value
        value: String,
    },
    /// a batch of commands executed in order within a single round trip
    Pipeline(Vec<Request>),
}

/// The result of a single successfully executed [`Request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// no value (missing key, or a command with nothing to report)
    Nil,
    /// a string value
    Text(String),
    /// an integer, e.g. a set cardinality
    Int(u64),
    /// a yes/no outcome, e.g. whether a set membership changed
    Bool(bool),
    /// set members or matched keys
    Members(Vec<String>),
    /// one reply per command of a pipeline, in request order
    Batch(Vec<Reply>),
}

impl Reply {
    /// the optional string value held by this reply
    pub fn into_text(self) -> Result<Option<String>> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Text(s) => Ok(Some(s)),
            other => Err(unexpected("text", &other)),
        }
    }

    /// the members held by this reply, a missing set is empty
    pub fn into_members(self) -> Result<Vec<String>> {
        match self {
            Reply::Nil => Ok(vec![]),
            Reply::Members(m) => Ok(m),
            other => Err(unexpected("members", &other)),
        }
    }

    /// the integer held by this reply
    pub fn into_int(self) -> Result<u64> {
        match self {
            Reply::Int(n) => Ok(n),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// the boolean held by this reply
    pub fn into_bool(self) -> Result<bool> {
        match self {
            Reply::Bool(b) => Ok(b),
            other => Err(unexpected("boolean", &other)),
        }
    }

    /// the batch of replies produced by a pipeline
    pub fn into_batch(self) -> Result<Vec<Reply>> {
        match self {
            Reply::Batch(replies) => Ok(replies),
            other => Err(unexpected("batch", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Reply) -> SwapError {
    SwapError::StoreUnavailable(format!("expected a {} reply, got {:?}", wanted, got))
}

/// The response Types that can be returned for any Request
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    /// this variant is returned when a request was successful
    Ok(Reply),
    /// this variant is returned if an Error occurs while processing the request
    Err(String),
}

/// Builder for a batch of commands that will be sent to the store as one round trip.
///
/// ```rust
/// use spotswap::Pipeline;
/// let mut pipe = Pipeline::new();
/// pipe.get("listing:1").get("listing:2");
/// assert_eq!(pipe.len(), 2);
/// ```
#[derive(Debug, Default, Clone)]
pub struct Pipeline {
    requests: Vec<Request>,
}

impl Pipeline {
    /// an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// queue a GET
    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Request::Get { key: key.into() })
    }

    /// queue a SET
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(Request::Set {
            key: key.into(),
            value: value.into(),
        })
    }

    /// queue a DEL
    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Request::Remove { key: key.into() })
    }

    /// queue a SADD
    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Request::SetAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    /// queue a SREM
    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Request::SetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    /// queue a SMEMBERS
    pub fn smembers(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Request::SetMembers { key: key.into() })
    }

    /// queue any request
    pub fn push(&mut self, request: Request) -> &mut Self {
        self.requests.push(request);
        self
    }

    /// number of queued commands
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// true if nothing has been queued
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// the queued commands, in order
    pub fn into_requests(self) -> Vec<Request> {
        self.requests
    }
}
