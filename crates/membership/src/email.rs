use tessera_core::{AuthzError, AuthzResult};

/// Lower-cased domain part of an email address.
pub fn email_domain(email: &str) -> AuthzResult<String> {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            Ok(domain.to_ascii_lowercase())
        }
        _ => Err(AuthzError::InvalidEmail(email.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_lowercased_domain() {
        assert_eq!(email_domain("Ann@Example.COM").unwrap(), "example.com");
        assert_eq!(email_domain(" a@b.io ").unwrap(), "b.io");
        assert_eq!(email_domain("weird@name@corp.dev").unwrap(), "corp.dev");
    }

    #[test]
    fn rejects_addresses_without_both_halves() {
        for bad in ["", "ann", "ann@", "@example.com"] {
            assert!(matches!(email_domain(bad), Err(AuthzError::InvalidEmail(_))), "{bad}");
        }
    }
}
