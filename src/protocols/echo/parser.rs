//! Echo protocol parser.

/// Parsed echo command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Echo the request back.
    Echo,
    /// Echo the request back, then close the session.
    Stop,
}

/// Classify one request frame.
///
/// The frame is a stop command only if it is valid UTF-8 and its trimmed
/// text equals `stop_word` exactly.
pub fn parse(frame: &[u8], stop_word: Option<&str>) -> Command {
    let Some(word) = stop_word else {
        return Command::Echo;
    };

    match std::str::from_utf8(frame) {
        Ok(text) if text.trim() == word => Command::Stop,
        _ => Command::Echo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_echo() {
        assert_eq!(parse(b"hello\n", Some("STOP")), Command::Echo);
        assert_eq!(parse(b"", Some("STOP")), Command::Echo);
        assert_eq!(parse(b"STOP please\n", Some("STOP")), Command::Echo);
    }

    #[test]
    fn test_parse_stop() {
        assert_eq!(parse(b"STOP\n", Some("STOP")), Command::Stop);
        assert_eq!(parse(b"STOP\r\n", Some("STOP")), Command::Stop);
        assert_eq!(parse(b"  STOP  ", Some("STOP")), Command::Stop);
    }

    #[test]
    fn test_stop_is_case_sensitive() {
        assert_eq!(parse(b"stop\n", Some("STOP")), Command::Echo);
        assert_eq!(parse(b"Stop\n", Some("STOP")), Command::Echo);
    }

    #[test]
    fn test_stop_disabled() {
        assert_eq!(parse(b"STOP\n", None), Command::Echo);
    }

    #[test]
    fn test_non_utf8_is_echoed() {
        assert_eq!(parse(&[0xff, 0xfe, b'\n'], Some("STOP")), Command::Echo);
    }
}
