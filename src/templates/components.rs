//! Shared HTML components: navigation bar, base template, escaping.

use super::styles::STYLE;

pub const GITHUB_URL: &str = "https://github.com/zubeirom/fluid-ag-demo";

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

// ============================================================================
// Navigation Bar
// ============================================================================

/// Header bar with the read-only viewer count.
pub fn nav_bar(viewers: usize) -> String {
    format!(
        r#"<nav class="nav-bar">
            <a href="/" class="brand">Fluid Demo</a>
            <span class="spacer"></span>
            <span id="conn-status" class="conn-status">Connecting...</span>
            <span class="btn btn-info">Zuschauer: <span id="viewer-count">{viewers}</span></span>
            <a class="btn btn-secondary" href="{GITHUB_URL}">GitHub</a>
        </nav>"#
    )
}

// ============================================================================
// Base Template
// ============================================================================

pub fn base_html(title: &str, content: &str, script: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{STYLE}</style>
</head>
<body>
    {nav}
    {content}
    {script}
</body>
</html>"#,
        title = html_escape(title),
        nav = nav_bar(0),
    )
}
