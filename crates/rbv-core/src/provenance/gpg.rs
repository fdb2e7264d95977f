//! Parsing of `git verify-tag --raw` / `git verify-commit --raw` output.
//!
//! With `--raw`, git forwards GnuPG's machine-readable status lines
//! (`[GNUPG:] GOODSIG <keyid> <uid>`, ...). SSH-signed objects print a
//! human-readable `Good "git" signature ... with <ALGO> key <FPR>` line
//! instead; both forms are understood.

use std::sync::OnceLock;

use regex::Regex;

use crate::provenance::SignatureStatus;

/// Signature facts extracted from raw tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    pub status: SignatureStatus,
    /// Key id or fingerprint of the signer, when the output names one.
    pub key_id: Option<String>,
}

const STATUS_PREFIX: &str = "[GNUPG:] ";

fn ssh_good_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?m)^Good "git" signature .* with \S+ key (\S+)"#).ok())
        .as_ref()
}

/// Interpret raw verification output.
///
/// `tool_succeeded` is the tool's exit status; output without any signature
/// markers from a failed call means the object carries no signature.
pub fn parse_signature_output(raw: &str, tool_succeeded: bool) -> ParsedSignature {
    let mut good: Option<String> = None;
    let mut bad: Option<String> = None;
    let mut errsig: Option<String> = None;
    let mut missing: Option<String> = None;
    let mut fingerprint: Option<String> = None;

    for line in raw.lines() {
        let Some(status) = line.trim_start().strip_prefix(STATUS_PREFIX) else {
            continue;
        };
        let mut fields = status.split_whitespace();
        let keyword = fields.next().unwrap_or_default();
        let arg = fields.next().map(str::to_string);
        match keyword {
            "GOODSIG" => good = arg,
            "BADSIG" | "EXPKEYSIG" | "REVKEYSIG" => bad = arg,
            "ERRSIG" => errsig = arg,
            "NO_PUBKEY" => missing = arg,
            "VALIDSIG" => fingerprint = arg,
            _ => {}
        }
    }

    if let Some(key) = bad {
        return ParsedSignature {
            status: SignatureStatus::Bad,
            key_id: Some(key),
        };
    }
    if let Some(key) = good {
        if tool_succeeded {
            return ParsedSignature {
                status: SignatureStatus::Good,
                key_id: Some(fingerprint.unwrap_or(key)),
            };
        }
        return ParsedSignature {
            status: SignatureStatus::Bad,
            key_id: Some(key),
        };
    }
    if missing.is_some() || errsig.is_some() {
        let key = missing.or(errsig);
        return ParsedSignature {
            status: SignatureStatus::MissingKey,
            key_id: key,
        };
    }
    if let Some(caps) = ssh_good_line().and_then(|re| re.captures(raw)) {
        if tool_succeeded {
            return ParsedSignature {
                status: SignatureStatus::Good,
                key_id: caps.get(1).map(|m| m.as_str().to_string()),
            };
        }
    }
    if raw.contains("BAD signature") || raw.contains("Bad signature") {
        return ParsedSignature {
            status: SignatureStatus::Bad,
            key_id: None,
        };
    }

    ParsedSignature {
        status: if tool_succeeded {
            // Exit 0 with nothing recognizable: treat as no information.
            SignatureStatus::Unavailable
        } else {
            SignatureStatus::Unsigned
        },
        key_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "\
[GNUPG:] NEWSIG
[GNUPG:] KEY_CONSIDERED 0123456789ABCDEF0123456789ABCDEFABCD1234 0
[GNUPG:] SIG_ID abc 2024-01-01 1704067200
[GNUPG:] GOODSIG 89ABCDEFABCD1234 Jane Dev <jane@example.com>
[GNUPG:] VALIDSIG 0123456789ABCDEF0123456789ABCDEFABCD1234 2024-01-01 1704067200 0 4 0 1 10 00 0123456789ABCDEF0123456789ABCDEFABCD1234
[GNUPG:] TRUST_UNDEFINED 0 pgp
";

    #[test]
    fn good_signature_prefers_fingerprint() {
        let parsed = parse_signature_output(GOOD, true);
        assert_eq!(parsed.status, SignatureStatus::Good);
        assert_eq!(
            parsed.key_id.as_deref(),
            Some("0123456789ABCDEF0123456789ABCDEFABCD1234")
        );
    }

    #[test]
    fn good_without_validsig_uses_long_key_id() {
        let parsed = parse_signature_output("[GNUPG:] GOODSIG ABCD1234 dev\n", true);
        assert_eq!(parsed.status, SignatureStatus::Good);
        assert_eq!(parsed.key_id.as_deref(), Some("ABCD1234"));
    }

    #[test]
    fn bad_signature() {
        let parsed = parse_signature_output("[GNUPG:] BADSIG 89ABCDEFABCD1234 dev\n", false);
        assert_eq!(parsed.status, SignatureStatus::Bad);
        assert_eq!(parsed.key_id.as_deref(), Some("89ABCDEFABCD1234"));
    }

    #[test]
    fn expired_key_counts_as_bad() {
        let parsed = parse_signature_output("[GNUPG:] EXPKEYSIG 89ABCDEFABCD1234 dev\n", false);
        assert_eq!(parsed.status, SignatureStatus::Bad);
    }

    #[test]
    fn missing_public_key_keeps_key_id() {
        let raw = "[GNUPG:] ERRSIG DEADBEEFDEADBEEF 1 10 00 1704067200 9 -\n[GNUPG:] NO_PUBKEY DEADBEEFDEADBEEF\n";
        let parsed = parse_signature_output(raw, false);
        assert_eq!(parsed.status, SignatureStatus::MissingKey);
        assert_eq!(parsed.key_id.as_deref(), Some("DEADBEEFDEADBEEF"));
    }

    #[test]
    fn unsigned_object() {
        let parsed = parse_signature_output("error: no signature found\n", false);
        assert_eq!(parsed.status, SignatureStatus::Unsigned);
        assert_eq!(parsed.key_id, None);
    }

    #[test]
    fn ssh_signature() {
        let raw = "Good \"git\" signature for dev@example.com with ED25519 key SHA256:abcDEF123\n";
        let parsed = parse_signature_output(raw, true);
        assert_eq!(parsed.status, SignatureStatus::Good);
        assert_eq!(parsed.key_id.as_deref(), Some("SHA256:abcDEF123"));
    }
}
