/// Errors raised when constructing validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input was empty or contained only whitespace.
    #[error("text cannot be empty")]
    Empty,
}

/// A string that is guaranteed to hold at least one non-whitespace character.
///
/// Input is trimmed on construction. Used for fields the workflow engine
/// refuses to accept blank, such as licence numbers and rejection notes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Trims the input and wraps it, or fails with [`TextError::Empty`] if
    /// nothing is left.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NonEmptyText {
    type Error = TextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NonEmptyText::new(value)
    }
}

impl From<NonEmptyText> for String {
    fn from(value: NonEmptyText) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_trims_real_content() {
        let text = NonEmptyText::new("  MD-1234  ").unwrap();
        assert_eq!(text.as_str(), "MD-1234");
    }

    #[test]
    fn rejects_blank_input() {
        assert!(NonEmptyText::new("").is_err());
        assert!(NonEmptyText::new("   \t\n").is_err());
    }

    #[test]
    fn deserialisation_applies_the_same_validation() {
        let ok: Result<NonEmptyText, _> = serde_json::from_str(r#""radiology""#);
        assert_eq!(ok.unwrap().as_str(), "radiology");

        let blank: Result<NonEmptyText, _> = serde_json::from_str(r#""   ""#);
        assert!(blank.is_err());
    }
}
