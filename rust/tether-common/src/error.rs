use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn already_borrowed(addr: usize) -> Error {
        Error(ErrorKind::AlreadyBorrowed { addr }.into())
    }

    pub fn capacity_overflow(requested: usize) -> Error {
        Error(ErrorKind::CapacityOverflow { requested }.into())
    }

    pub fn allocation_failed(layout: std::alloc::Layout) -> Error {
        Error(
            ErrorKind::AllocationFailed {
                size: layout.size(),
                align: layout.align(),
            }
            .into(),
        )
    }

    /// Returns `true` if this error reports an address that is already on loan.
    pub fn is_already_borrowed(&self) -> bool {
        matches!(self.kind(), ErrorKind::AlreadyBorrowed { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("address {addr:#x} is already registered as borrowed")]
    AlreadyBorrowed { addr: usize },

    #[error("capacity overflow: {requested} elements")]
    CapacityOverflow { requested: usize },

    #[error("memory allocation of {size} bytes (align {align}) failed")]
    AllocationFailed { size: usize, align: usize },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::already_borrowed(0x1000);
        assert_eq!(
            e.to_string(),
            "address 0x1000 is already registered as borrowed"
        );
        assert!(e.is_already_borrowed());

        let e = Error::capacity_overflow(usize::MAX);
        assert!(!e.is_already_borrowed());
        assert!(matches!(e.into_kind(), ErrorKind::CapacityOverflow { .. }));
    }

    #[test]
    fn test_allocation_failed_reports_layout() {
        let layout = std::alloc::Layout::from_size_align(64, 16).unwrap();
        let e = Error::allocation_failed(layout);
        match e.kind() {
            ErrorKind::AllocationFailed { size, align } => {
                assert_eq!(*size, 64);
                assert_eq!(*align, 16);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
