#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SessionStats {
    chunks_sent: u64,
    replies_spoken: u64,
    pings_answered: u64,
    notices_raised: u64,
}

impl SessionStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn chunk_sent(&mut self) {
        self.chunks_sent += 1;
    }

    pub(crate) fn reply_spoken(&mut self) {
        self.replies_spoken += 1;
    }

    pub(crate) fn ping_answered(&mut self) {
        self.pings_answered += 1;
    }

    pub(crate) fn notice_raised(&mut self) {
        self.notices_raised += 1;
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    pub fn replies_spoken(&self) -> u64 {
        self.replies_spoken
    }

    pub fn pings_answered(&self) -> u64 {
        self.pings_answered
    }

    pub fn notices_raised(&self) -> u64 {
        self.notices_raised
    }
}
