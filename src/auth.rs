/// A bearer credential for one of the pipeline's collaborators.
///
/// The value never appears in `Debug` output, so clients holding a token can
/// be logged freely.
#[derive(Clone)]
pub struct Token(String);

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.trim().to_owned())
    }
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or whitespace-only values are treated as no token at all.
    pub fn non_empty(value: Option<&str>) -> Option<Self> {
        value.map(Self::from).filter(|token| !token.0.is_empty())
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<redacted>")
    }
}
