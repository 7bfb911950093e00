//! Mapping of [`Error`] onto negative wire status codes

use tether_core::Error;

/// Negative errno-style status for `err`
#[must_use]
pub fn status_code(err: &Error) -> i32 {
    let errno = match err {
        Error::AllocationFailure { .. } => libc::ENOMEM,
        Error::NotFound { .. } => libc::ENOENT,
        Error::AlreadyExists { .. } => libc::EEXIST,
        Error::NoSpace { .. } => libc::ENOSPC,
        Error::PermissionDenied { .. } => libc::EACCES,
        Error::InvalidArgument { .. } => libc::EINVAL,
        _ => libc::EIO,
    };
    -errno
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative() {
        assert_eq!(status_code(&Error::not_found("x")), -libc::ENOENT);
        assert_eq!(status_code(&Error::already_exists("x")), -libc::EEXIST);
        assert_eq!(status_code(&Error::no_space("x")), -libc::ENOSPC);
        assert_eq!(status_code(&Error::denied("x")), -libc::EACCES);
        assert_eq!(status_code(&Error::invalid("x")), -libc::EINVAL);
        assert_eq!(
            status_code(&Error::AllocationFailure { what: "x".into() }),
            -libc::ENOMEM
        );
        assert_eq!(
            status_code(&Error::init_failure("s", Error::invalid("x"))),
            -libc::EIO
        );
    }
}
