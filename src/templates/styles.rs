//! CSS styles for the grid page.

// ============================================================================
// CSS Styles
// ============================================================================

pub const STYLE: &str = r#"
/* Solarized Light Theme */
:root {
    --base03: #002b36;
    --base02: #073642;
    --base01: #586e75;
    --base00: #657b83;
    --base1: #93a1a1;
    --base2: #eee8d5;
    --base3: #fdf6e3;

    --blue: #268bd2;
    --cyan: #2aa198;
    --green: #859900;
    --yellow: #b58900;
    --red: #dc322f;

    --bg: var(--base3);
    --fg: var(--base00);
    --muted: var(--base1);
    --border: var(--base2);
    --highlight: #f7f2e2;
}

* { box-sizing: border-box; }

body {
    margin: 0;
    background: var(--bg);
    color: var(--fg);
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Helvetica, Arial, sans-serif;
}

.nav-bar {
    display: flex;
    align-items: center;
    gap: 1rem;
    padding: 0.6rem 1.5rem;
    background: var(--base03);
    color: var(--base3);
}

.nav-bar .brand {
    font-weight: 600;
    color: var(--base3);
    text-decoration: none;
}

.nav-bar .spacer { flex: 1; }

.nav-bar .btn {
    padding: 0.3rem 0.8rem;
    border-radius: 4px;
    font-size: 0.85rem;
    text-decoration: none;
    border: none;
}

.btn-info { background: var(--cyan); color: var(--base3); }
.btn-secondary { background: var(--base01); color: var(--base3); }

.conn-status { font-size: 0.75rem; color: var(--yellow); }
.conn-status.connected { color: var(--green); }
.conn-status.disconnected { color: var(--red); }

.grid-container {
    height: 350px;
    overflow: auto;
    margin: 1rem 1.5rem;
    border: 1px solid var(--border);
}

table.grid {
    width: 100%;
    table-layout: fixed;
    border-collapse: collapse;
}

table.grid th {
    position: sticky;
    top: 0;
    background: var(--base2);
    text-align: left;
    padding: 0.5rem;
    font-size: 0.85rem;
}

table.grid td {
    padding: 0.4rem 0.5rem;
    border-top: 1px solid var(--border);
}

table.grid td[contenteditable="true"]:focus {
    outline: 2px solid var(--blue);
    background: white;
}

table.grid td.flash {
    background: var(--highlight);
    transition: background 0.5s;
}
"#;
