use switchboard_types::Token;

/// Resume state carried across connection attempts.
///
/// The run loop feeds this from handshake payloads; nothing here talks to
/// the network.
#[derive(Clone, Debug)]
pub struct Session {
    token: Token,
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    resumable: bool,
}

impl Session {
    #[must_use]
    pub fn new(token: Token) -> Self {
        Self {
            token,
            session_id: None,
            sequence: None,
            resume_url: None,
            resumable: true,
        }
    }

    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Records the identity of a freshly established session, with the url
    /// the server wants resumes directed at.
    pub fn start(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
        self.resumable = true;
    }

    /// Url resume attempts should connect to, when the server gave one.
    #[must_use]
    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    /// Tracks the highest sequence number seen so far.
    ///
    /// Sequence numbers only ever move forward; a frame arriving late must
    /// not rewind what a resume would replay.
    pub fn observe_sequence(&mut self, sequence: u64) {
        if self.sequence.is_none_or(|current| sequence > current) {
            self.sequence = Some(sequence);
        }
    }

    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Marks the session unusable for resuming without forgetting the token.
    pub fn invalidate(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
        self.resumable = false;
    }

    pub fn set_resumable(&mut self, resumable: bool) {
        self.resumable = resumable;
    }

    /// Returns the session id and sequence to resume with, when the session
    /// is still worth resuming.
    #[must_use]
    pub fn resume_state(&self) -> Option<(&str, u64)> {
        if !self.resumable {
            return None;
        }
        match (self.session_id.as_deref(), self.sequence) {
            (Some(id), Some(sequence)) => Some((id, sequence)),
            _ => None,
        }
    }
}
