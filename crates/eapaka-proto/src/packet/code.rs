/// RADIUS packet codes exchanged during an EAP authentication
/// conversation (RFC 2865 Section 4, RFC 3579)
///
/// The tester only ever sends Access-Request and accepts the three reply
/// codes an authentication server may answer with; anything else on the
/// wire is rejected at decode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Code {
    /// Access-Request (1)
    AccessRequest = 1,
    /// Access-Accept (2)
    AccessAccept = 2,
    /// Access-Reject (3)
    AccessReject = 3,
    /// Access-Challenge (11)
    AccessChallenge = 11,
}

impl Code {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Code::AccessRequest),
            2 => Some(Code::AccessAccept),
            3 => Some(Code::AccessReject),
            11 => Some(Code::AccessChallenge),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in [
            Code::AccessRequest,
            Code::AccessAccept,
            Code::AccessReject,
            Code::AccessChallenge,
        ] {
            assert_eq!(Code::from_u8(code.as_u8()), Some(code));
        }
    }

    #[test]
    fn test_unhandled_codes_rejected() {
        // accounting and status codes are outside the tool's conversation
        assert_eq!(Code::from_u8(4), None);
        assert_eq!(Code::from_u8(5), None);
        assert_eq!(Code::from_u8(12), None);
        assert_eq!(Code::from_u8(0), None);
    }
}
