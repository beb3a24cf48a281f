use std::fmt;

use super::enums::PortProtocol;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Port {
    pub number: u16,
    pub proto: PortProtocol,
}

impl Port {
    pub fn new(number: u16, proto: PortProtocol) -> Self {
        Self { number, proto }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.proto)
    }
}
