//! Core type definitions for the filtering engine
//!
//! These types map directly to the ruleset binary format and
//! are used throughout the matching engine.

// =============================================================================
// Rule Actions
// =============================================================================

/// Action carried by a declarative rule.
///
/// Each action routes a rule into its own pattern index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RuleAction {
    /// Cancels the request
    Block = 0,
    /// Exception rule - suppresses block rules of the same ruleset
    Allow = 1,
    /// Redirects the request to a target URL
    Redirect = 2,
}

// =============================================================================
// Rule Options (bit flags for the rule record options field)
// =============================================================================

bitflags::bitflags! {
    /// Options derived from the action, case sensitivity and domain type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RuleOptions: u8 {
        /// Rule is an exception (allow) rule
        const IS_ALLOW = 1 << 0;
        /// Pattern compares case-sensitively
        const IS_CASE_SENSITIVE = 1 << 1;
        /// Rule applies to first-party requests
        const APPLIES_TO_FIRST_PARTY = 1 << 2;
        /// Rule applies to third-party requests
        const APPLIES_TO_THIRD_PARTY = 1 << 3;

        /// Both parties
        const APPLIES_TO_ANY_PARTY = Self::APPLIES_TO_FIRST_PARTY.bits() | Self::APPLIES_TO_THIRD_PARTY.bits();
    }
}

// =============================================================================
// Element Types (bit mask for resource type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ElementType: u16 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const XMLHTTPREQUEST = 1 << 5;
        const SUBDOCUMENT = 1 << 6;  // sub_frame
        const MAIN_FRAME = 1 << 7;
        const PING = 1 << 8;
        const MEDIA = 1 << 9;
        const FONT = 1 << 10;
        const WEBSOCKET = 1 << 11;

        /// All resource types
        const ALL = (1 << 12) - 1;
    }
}

impl ElementType {
    /// Parse from a resource type name as used in rule input and by the
    /// network layer. Returns `None` for unknown names.
    pub fn from_resource_name(s: &str) -> Option<Self> {
        match s {
            "main_frame" => Some(Self::MAIN_FRAME),
            "sub_frame" => Some(Self::SUBDOCUMENT),
            "stylesheet" => Some(Self::STYLESHEET),
            "script" => Some(Self::SCRIPT),
            "image" => Some(Self::IMAGE),
            "font" => Some(Self::FONT),
            "object" => Some(Self::OBJECT),
            "xmlhttprequest" => Some(Self::XMLHTTPREQUEST),
            "ping" => Some(Self::PING),
            "media" => Some(Self::MEDIA),
            "websocket" => Some(Self::WEBSOCKET),
            "other" => Some(Self::OTHER),
            _ => None,
        }
    }

    /// Query-side conversion: unknown request types are treated as `other`.
    pub fn from_request_type(s: &str) -> Self {
        Self::from_resource_name(s).unwrap_or(Self::OTHER)
    }
}

// =============================================================================
// Pattern Descriptor
// =============================================================================

/// How the pattern body is compared against a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PatternType {
    /// Plain substring, no metacharacters
    #[default]
    Substring = 0,
    /// Contains `*` or `^`
    Wildcarded = 1,
}

impl TryFrom<u8> for PatternType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Substring),
            1 => Ok(Self::Wildcarded),
            _ => Err(()),
        }
    }
}

/// Anchor at the start of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum LeftAnchor {
    #[default]
    None = 0,
    /// `|pattern` - start of URL
    Boundary = 1,
    /// `||pattern` - start of host or of any host label
    Subdomain = 2,
}

impl TryFrom<u8> for LeftAnchor {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Boundary),
            2 => Ok(Self::Subdomain),
            _ => Err(()),
        }
    }
}

/// Anchor at the end of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RightAnchor {
    #[default]
    None = 0,
    /// `pattern|` - end of URL
    Boundary = 1,
}

impl TryFrom<u8> for RightAnchor {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Boundary),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Request Context
// =============================================================================

/// Context for a request being matched. Built fresh per request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Full request URL
    pub url: &'a str,
    /// Origin (or bare host) of the frame that initiated the request
    pub initiator: Option<&'a str>,
    /// Resource type of the request
    pub element_type: ElementType,
    /// Does the request origin differ from the initiator origin?
    pub is_third_party: bool,
}

impl<'a> RequestContext<'a> {
    pub fn new(url: &'a str, element_type: ElementType) -> Self {
        Self {
            url,
            initiator: None,
            element_type,
            is_third_party: false,
        }
    }

    pub fn with_initiator(mut self, initiator: &'a str) -> Self {
        self.initiator = Some(initiator);
        self
    }

    pub fn third_party(mut self, is_third_party: bool) -> Self {
        self.is_third_party = is_third_party;
        self
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Final decision for a request across all active rulesets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Decision {
    /// No ruleset blocked or redirected the request
    #[default]
    Allowed,
    /// Request is cancelled
    Blocked,
    /// Request is redirected to the contained URL
    RedirectTo(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_type_names_round_trip() {
        assert_eq!(ElementType::from_resource_name("sub_frame"), Some(ElementType::SUBDOCUMENT));
        assert_eq!(ElementType::from_resource_name("websocket"), Some(ElementType::WEBSOCKET));
        assert_eq!(ElementType::from_resource_name("beacon"), None);
        assert_eq!(ElementType::from_request_type("beacon"), ElementType::OTHER);
    }

    #[test]
    fn all_covers_every_named_type() {
        let names = [
            "main_frame", "sub_frame", "stylesheet", "script", "image", "font",
            "object", "xmlhttprequest", "ping", "media", "websocket", "other",
        ];
        let mut mask = ElementType::empty();
        for name in names {
            mask |= ElementType::from_resource_name(name).unwrap();
        }
        assert_eq!(mask, ElementType::ALL);
    }

    #[test]
    fn anchors_reject_unknown_discriminants() {
        assert_eq!(LeftAnchor::try_from(2), Ok(LeftAnchor::Subdomain));
        assert!(LeftAnchor::try_from(3).is_err());
        assert!(RightAnchor::try_from(2).is_err());
        assert!(PatternType::try_from(7).is_err());
    }
}
