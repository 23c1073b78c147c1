//! WebSocket close codes used by the gateway.

/// Close codes sent when the gateway terminates a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    /// Clean shutdown.
    Normal = 1000,
    /// Session went unresponsive (missed pongs) or the server is stopping.
    GoingAway = 1001,
    /// Unparseable or non-binary frame.
    UnsupportedData = 1003,
    /// Slow consumer: outbound buffer stayed full past the grace period.
    PolicyViolation = 1008,
    /// Token rejected.
    AuthFailed = 4001,
}

impl CloseCode {
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1003 => Some(Self::UnsupportedData),
            1008 => Some(Self::PolicyViolation),
            4001 => Some(Self::AuthFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_contract() {
        assert_eq!(CloseCode::UnsupportedData.as_u16(), 1003);
        assert_eq!(CloseCode::PolicyViolation.as_u16(), 1008);
        assert_eq!(CloseCode::AuthFailed.as_u16(), 4001);
        assert_eq!(CloseCode::from_u16(4001), Some(CloseCode::AuthFailed));
        assert_eq!(CloseCode::from_u16(4002), None);
    }
}
