//! Splits a raw byte stream into complete lines on LF or CRLF, retaining
//! any trailing partial line across calls. Grounded on the line-buffering
//! behavior `GrblCommunicator::read_line` performs over its
//! `Communicator::receive` byte stream.

#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed newly-read bytes in; returns every complete line found,
    /// stripped of its terminator. Partial trailing bytes are retained for
    /// the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        loop {
            let newline_pos = match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => pos,
                None => break,
            };
            let mut end = newline_pos;
            if end > 0 && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }
            let line = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
            lines.push(line);
            self.buffer.drain(..=newline_pos);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_lf() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"ok\nok\n");
        assert_eq!(lines, vec!["ok".to_string(), "ok".to_string()]);
    }

    #[test]
    fn splits_on_crlf() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"ok\r\nerror:1\r\n");
        assert_eq!(lines, vec!["ok".to_string(), "error:1".to_string()]);
    }

    #[test]
    fn retains_partial_line_across_feeds() {
        let mut framer = LineFramer::new();
        let first = framer.feed(b"ok\npartial-lin");
        assert_eq!(first, vec!["ok".to_string()]);
        let second = framer.feed(b"e\n");
        assert_eq!(second, vec!["partial-line".to_string()]);
    }

    #[test]
    fn no_terminator_yields_nothing_yet() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"still waiting").is_empty());
    }

    #[test]
    fn handles_multiple_lines_in_one_chunk_with_trailing_partial() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"<Idle|MPos:0,0,0>\nok\npart");
        assert_eq!(lines, vec!["<Idle|MPos:0,0,0>".to_string(), "ok".to_string()]);
        let rest = framer.feed(b"ial\n");
        assert_eq!(rest, vec!["partial".to_string()]);
    }
}
