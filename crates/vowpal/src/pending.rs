use crate::VowpalError;

/// Count of lines submitted to the engine whose results have not been
/// consumed yet.
///
/// The writer adds once per line it accepts into its buffer; the reader
/// consumes once per complete result line it parses. The request and
/// response streams are only correctly paired while this never underflows,
/// so a would-be-negative consume is a fatal accounting error rather than a
/// clamp.
#[derive(Debug, Default)]
pub(crate) struct PendingLines(usize);

impl PendingLines {
    pub(crate) fn add(&mut self, lines: usize) {
        self.0 += lines;
    }

    pub(crate) fn consume(&mut self, lines: usize) -> Result<(), VowpalError> {
        if lines > self.0 {
            return Err(VowpalError::LedgerUnderflow {
                pending: self.0,
                consumed: lines,
            });
        }
        self.0 -= lines;
        Ok(())
    }

    pub(crate) fn get(&self) -> usize {
        self.0
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.0 == 0
    }
}
