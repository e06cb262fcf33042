use miette::SourceSpan;
use nom::Offset;

/// A span of the program source, in bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Location {
    offset: usize,
    length: usize,
}

impl Location {
    /// Location of `part`, which must be a slice of `source`
    pub(crate) fn of(source: &str, part: &str) -> Self {
        Self {
            offset: source.offset(part),
            length: part.len(),
        }
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// 1-based line and column of the start of the span
    #[must_use]
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let before = &source[..self.offset.min(source.len())];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map_or(before.len(), |newline| before.len() - newline - 1)
            + 1;
        (line, column)
    }
}

impl From<Location> for SourceSpan {
    fn from(location: Location) -> Self {
        (location.offset, location.length).into()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.offset, self.offset + self.length)
    }
}
