//! Gateway-owned HTML pages.
//!
//! Neither page ever carries origin content.

use edgeguard_core::transform::script_tag;

/// Path the challenge form posts to.
pub const VERIFY_PATH: &str = "/challenge/verify";

/// Interstitial HTML template.
const CHALLENGE_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Checking your browser</title>
    {{HEAD}}
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #f4f6f8;
            color: #1f2933;
        }
        .container {
            text-align: center;
            padding: 2rem;
            max-width: 480px;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Checking your browser</h1>
        <p>This only takes a moment. The page reloads once the check is complete.</p>
        <noscript><p>JavaScript is required to continue.</p></noscript>
        <form id="edgeguard-challenge" method="post" action="{{ACTION}}">
            <input type="hidden" name="token" value="">
            <input type="hidden" name="return_to" value="{{RETURN_TO}}">
        </form>
    </div>
</body>
</html>"#;

/// Deny page HTML template.
const BLOCK_PAGE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Request blocked</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #1f2933;
            color: white;
        }
        .container {
            text-align: center;
            padding: 2rem;
            max-width: 480px;
        }
        .reason {
            background: rgba(255,255,255,0.1);
            padding: 1rem;
            border-radius: 8px;
            margin-top: 1rem;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Request blocked</h1>
        <p>This request was refused by the site's bot protection.</p>
        <div class="reason">
            <p><strong>Reference:</strong> {{REASON}}</p>
        </div>
    </div>
</body>
</html>"#;

/// Escapes text for HTML content and attribute values.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Renders the challenge interstitial.
///
/// Without a script URL the page refreshes itself until one is available.
pub fn challenge_page(script_url: Option<&str>, return_to: &str) -> String {
    let head = match script_url {
        Some(url) => script_tag(url),
        None => r#"<meta http-equiv="refresh" content="5">"#.to_string(),
    };
    CHALLENGE_PAGE_HTML
        .replace("{{HEAD}}", &head)
        .replace("{{ACTION}}", VERIFY_PATH)
        .replace("{{RETURN_TO}}", &escape_html(return_to))
}

/// Renders the deny page.
pub fn block_page(reason: &str) -> String {
    BLOCK_PAGE_HTML.replace("{{REASON}}", &escape_html(reason))
}

/// Sanitizes a post-verification redirect target to a same-origin path.
pub fn safe_return_to(value: Option<&str>) -> String {
    match value {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}
