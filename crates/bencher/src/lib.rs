//! Shared fixtures of the chain benchmarks.

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    body_len: usize,
    middleware: usize,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, body_len: usize, middleware: usize) -> Self {
        Self { name, group, body_len, middleware }
    }

    pub fn small(name: &'static str, middleware: usize) -> Self {
        Self::new(name, TestGroup::Small, 64, middleware)
    }

    pub fn normal(name: &'static str, middleware: usize) -> Self {
        Self::new(name, TestGroup::Normal, 16 * 1024, middleware)
    }

    pub fn large(name: &'static str, middleware: usize) -> Self {
        Self::new(name, TestGroup::Large, 1024 * 1024, middleware)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    /// Request body size in bytes.
    pub fn body_len(&self) -> usize {
        self.body_len
    }

    /// Number of pass-through middleware in front of the route handler.
    pub fn middleware(&self) -> usize {
        self.middleware
    }

    /// An urlencoded form body of exactly `body_len` bytes.
    pub fn form_body(&self) -> Vec<u8> {
        const PREFIX: &[u8] = b"note=";
        let mut body = Vec::with_capacity(self.body_len.max(PREFIX.len()));
        body.extend_from_slice(PREFIX);
        body.resize(self.body_len.max(PREFIX.len()), b'a');
        body
    }

    /// The body split into frames of `chunk` bytes.
    pub fn chunks(&self, chunk: usize) -> Vec<Vec<u8>> {
        self.form_body().chunks(chunk.max(1)).map(<[u8]>::to_vec).collect()
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}
