use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::config::RedactionConfig;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    static ref PHONE_REGEX: Regex =
        Regex::new(r"(?:\+1[-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b").unwrap();
    static ref SSN_REGEX: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref MRN_REGEX: Regex = Regex::new(r"(?i)\bMRN[-:#\s]?\d{4,12}\b").unwrap();
}

/// Masks protected health information in free text before it is logged.
///
/// With `hash_for_correlation` each match is replaced by a short SHA-256
/// fingerprint so the same value can be followed across log lines without
/// being readable.
#[derive(Debug, Clone, Default)]
pub struct PhiRedactor {
    config: RedactionConfig,
}

impl PhiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn redact(&self, text: &str) -> String {
        if !self.config.enabled {
            return text.to_string();
        }

        let mut result = text.to_string();
        if self.config.redact_mrn {
            result = self.replace(&MRN_REGEX, &result, "MRN", |_| "MRN******".to_string());
        }
        if self.config.redact_ssn {
            result = self.replace(&SSN_REGEX, &result, "SSN", |_| "***-**-****".to_string());
        }
        if self.config.redact_emails {
            result = self.replace(&EMAIL_REGEX, &result, "EMAIL", mask_email);
        }
        if self.config.redact_phones {
            result = self.replace(&PHONE_REGEX, &result, "PHONE", |_| "(***) ***-****".to_string());
        }
        result
    }

    fn replace(
        &self,
        pattern: &Regex,
        text: &str,
        label: &str,
        mask: impl Fn(&str) -> String,
    ) -> String {
        pattern
            .replace_all(text, |caps: &Captures| {
                if self.config.hash_for_correlation {
                    format!("{}[{}]", label, hash_value(&caps[0]))
                } else {
                    mask(&caps[0])
                }
            })
            .into_owned()
    }
}

fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => format!(
            "{}***@{}***",
            local.chars().next().unwrap_or('*'),
            domain.chars().next().unwrap_or('*')
        ),
        None => "***@***".to_string(),
    }
}

/// First 8 bytes of the SHA-256 digest, base64 encoded
fn hash_value(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    general_purpose::STANDARD.encode(&digest[..8])
}
