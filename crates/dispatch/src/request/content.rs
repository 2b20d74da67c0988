//! Content type matching and `Accept` negotiation.
//!
//! Types can be given as shorthands (`"json"`, `"html"`), as full media types
//! (`"application/json"`), with wildcards (`"text/*"`), or as a structured syntax suffix
//! (`"+json"`). Whatever form was passed in is what gets returned on a match.

use mime::Mime;
use std::borrow::Cow;

/// Resolves a shorthand to its media type.
pub fn lookup(shorthand: &str) -> Option<&'static str> {
    let media_type = match shorthand.to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "text" | "txt" => "text/plain",
        "xml" => "application/xml",
        "urlencoded" | "form" => "application/x-www-form-urlencoded",
        "multipart" => "multipart/*",
        "js" | "javascript" => "text/javascript",
        "css" => "text/css",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "bin" | "octet" => "application/octet-stream",
        _ => return None,
    };
    Some(media_type)
}

/// Expands a user supplied type into a `type/subtype` pattern.
fn normalize(ty: &str) -> Option<Cow<'static, str>> {
    let ty = ty.trim();
    if ty.starts_with('+') {
        Some(Cow::Owned(format!("*/*{}", ty.to_ascii_lowercase())))
    } else if ty.contains('/') {
        Some(Cow::Owned(ty.to_ascii_lowercase()))
    } else {
        lookup(ty).map(Cow::Borrowed)
    }
}

/// Whether the concrete media type `actual` satisfies the pattern `expected`.
fn mime_match(expected: &str, actual: &str) -> bool {
    let (Some((expected_type, expected_subtype)), Some((actual_type, actual_subtype))) =
        (expected.split_once('/'), actual.split_once('/'))
    else {
        return false;
    };

    if expected_type != "*" && expected_type != actual_type {
        return false;
    }

    if let Some(suffix) = expected_subtype.strip_prefix("*+") {
        return actual_subtype.rsplit_once('+').is_some_and(|(_, actual_suffix)| actual_suffix == suffix);
    }

    expected_subtype == "*" || expected_subtype == actual_subtype
}

fn essence(value: &str) -> Option<String> {
    let mime = value.trim().parse::<Mime>().ok()?;
    Some(mime.essence_str().to_ascii_lowercase())
}

/// Finds the first of `types` matched by a `Content-Type` header value.
pub fn type_is<'t>(content_type: Option<&str>, types: &[&'t str]) -> Option<&'t str> {
    let actual = essence(content_type?)?;
    types.iter().copied().find(|ty| normalize(ty).is_some_and(|expected| mime_match(&expected, &actual)))
}

#[derive(Debug)]
struct MediaRange {
    ty: String,
    subtype: String,
    quality: f32,
    order: usize,
}

impl MediaRange {
    fn parse(order: usize, raw: &str) -> Option<Self> {
        let mut parts = raw.split(';');
        let (ty, subtype) = parts.next()?.trim().split_once('/')?;
        if ty.is_empty() || subtype.is_empty() {
            return None;
        }

        let mut quality = 1.0;
        for param in parts {
            if let Some((name, value)) = param.split_once('=')
                && name.trim().eq_ignore_ascii_case("q")
            {
                quality = value.trim().parse::<f32>().ok()?.clamp(0.0, 1.0);
            }
        }

        Some(Self { ty: ty.to_ascii_lowercase(), subtype: subtype.to_ascii_lowercase(), quality, order })
    }

    /// Specificity of this range against a concrete type, or `None` when it does not match.
    fn specificity(&self, ty: &str, subtype: &str) -> Option<u8> {
        let mut specificity = 0;
        if self.ty == ty {
            specificity |= 2;
        } else if self.ty != "*" {
            return None;
        }
        if self.subtype == subtype {
            specificity |= 1;
        } else if self.subtype != "*" {
            return None;
        }
        Some(specificity)
    }
}

/// The priority of one offered type: quality, specificity, position of the range in the
/// header, position of the offer.
type Priority = (f32, u8, usize, usize);

fn priority(ranges: &[MediaRange], offer_index: usize, offer: &str) -> Option<Priority> {
    let (ty, subtype) = offer.split_once('/')?;
    ranges
        .iter()
        .filter_map(|range| range.specificity(ty, subtype).map(|specificity| (range, specificity)))
        .max_by(|(a, sa), (b, sb)| sa.cmp(sb).then(b.order.cmp(&a.order)))
        .map(|(range, specificity)| (range.quality, specificity, range.order, offer_index))
}

/// Negotiates `types` against an `Accept` header value.
///
/// Without a header every type is acceptable and the first one wins. Otherwise the offer
/// with the highest quality wins; ties prefer the more specific range, then the range
/// listed first by the client, then the type offered first.
pub fn negotiate<'t>(accept: Option<&str>, types: &[&'t str]) -> Option<&'t str> {
    let accept = accept.map(str::trim).filter(|accept| !accept.is_empty());
    let Some(accept) = accept else {
        return types.first().copied();
    };

    let ranges = accept.split(',').enumerate().filter_map(|(order, raw)| MediaRange::parse(order, raw)).collect::<Vec<_>>();

    types
        .iter()
        .enumerate()
        .filter_map(|(index, ty)| {
            let offer = normalize(ty)?;
            let priority = priority(&ranges, index, &offer)?;
            (priority.0 > 0.0).then_some((*ty, priority))
        })
        .max_by(|(_, a), (_, b)| {
            a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(b.2.cmp(&a.2)).then(b.3.cmp(&a.3))
        })
        .map(|(ty, _)| ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("json"), Some("application/json"));
        assert_eq!(lookup("HTML"), Some("text/html"));
        assert_eq!(lookup("nope"), None);
    }

    #[test]
    fn test_type_is_shorthand() {
        let content_type = Some("application/json; charset=utf-8");
        assert_eq!(type_is(content_type, &["json"]), Some("json"));
        assert_eq!(type_is(content_type, &["html", "json"]), Some("json"));
        assert_eq!(type_is(content_type, &["html"]), None);
        assert_eq!(type_is(None, &["json"]), None);
    }

    #[test]
    fn test_type_is_full_and_wildcards() {
        assert_eq!(type_is(Some("text/html"), &["text/*"]), Some("text/*"));
        assert_eq!(type_is(Some("text/html"), &["*/html"]), Some("*/html"));
        assert_eq!(type_is(Some("TEXT/HTML"), &["text/html"]), Some("text/html"));
        assert_eq!(type_is(Some("application/vnd.api+json"), &["+json"]), Some("+json"));
        assert_eq!(type_is(Some("application/vnd.api+json"), &["json"]), None);
        assert_eq!(type_is(Some("multipart/form-data; boundary=x"), &["multipart"]), Some("multipart"));
    }

    #[test]
    fn test_type_is_invalid_header() {
        assert_eq!(type_is(Some("not a mime"), &["json"]), None);
    }

    #[test]
    fn test_negotiate_without_header() {
        assert_eq!(negotiate(None, &["json", "html"]), Some("json"));
        assert_eq!(negotiate(Some(""), &["html"]), Some("html"));
        assert_eq!(negotiate(None, &[]), None);
    }

    #[test]
    fn test_negotiate_quality() {
        let accept = Some("text/html, application/json;q=0.9");
        assert_eq!(negotiate(accept, &["json", "html"]), Some("html"));
        assert_eq!(negotiate(accept, &["json"]), Some("json"));
        assert_eq!(negotiate(accept, &["png"]), None);
    }

    #[test]
    fn test_negotiate_wildcards_and_zero_quality() {
        let accept = Some("application/json;q=0, */*;q=0.1");
        assert_eq!(negotiate(accept, &["json"]), None);
        assert_eq!(negotiate(accept, &["json", "text"]), Some("text"));

        let accept = Some("text/*");
        assert_eq!(negotiate(accept, &["json", "html"]), Some("html"));
    }

    #[test]
    fn test_negotiate_tie_prefers_offer_order() {
        let accept = Some("*/*");
        assert_eq!(negotiate(accept, &["html", "json"]), Some("html"));
        assert_eq!(negotiate(accept, &["json", "html"]), Some("json"));
    }
}
