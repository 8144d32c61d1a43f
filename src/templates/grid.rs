//! The collaborative grid page.
//!
//! Renders an editable table of the default rows plus a `<script>` block that
//! runs the sync protocol in the browser:
//!
//! - empty `location.hash` -> `POST /api/sessions`, then write the id into the hash
//! - connect to `/api/sessions/{id}/ws`
//! - on cell commit, send the full row snapshot under `gridData`
//! - on `init` / `value_changed`, replace the table's rows when a value is present

use crate::models::{ColumnDef, OlympicRow, GRID_DATA_KEY};

use super::components::{base_html, html_escape};

/// Serialize for embedding inside a `<script>` element.
fn script_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace("</", "<\\/")
}

/// One `<col>` per column, sized by its share of the total flex weight.
fn render_colgroup(columns: &[ColumnDef]) -> String {
    let total: u32 = columns.iter().map(|c| c.flex).sum();
    let cols: String = columns
        .iter()
        .map(|c| {
            let share = if total == 0 {
                100.0 / columns.len() as f64
            } else {
                f64::from(c.flex) * 100.0 / f64::from(total)
            };
            format!(r#"<col style="width: {:.1}%">"#, share)
        })
        .collect();
    format!("<colgroup>{}</colgroup>", cols)
}

fn render_table(columns: &[ColumnDef], rows: &[OlympicRow]) -> String {
    let colgroup = render_colgroup(columns);
    let header: String = columns
        .iter()
        .map(|c| format!("<th>{}</th>", html_escape(&c.field)))
        .collect();

    let mut body = String::new();
    for (i, row) in rows.iter().enumerate() {
        body.push_str("<tr>");
        for column in columns {
            let text = match row.field(&column.field) {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            body.push_str(&format!(
                r#"<td data-row="{i}" data-field="{field}" contenteditable="{editable}">{text}</td>"#,
                field = html_escape(&column.field),
                editable = column.editable,
                text = html_escape(&text),
            ));
        }
        body.push_str("</tr>");
    }

    format!(
        r#"<div class="grid-container">
        <table class="grid">
            {colgroup}
            <thead><tr>{header}</tr></thead>
            <tbody id="grid-body">{body}</tbody>
        </table>
    </div>"#
    )
}

fn render_sync_script(columns: &[ColumnDef], rows: &[OlympicRow]) -> String {
    format!(
        r##"<script>
(function() {{
    'use strict';

    const COLUMNS = {columns_json};
    const GRID_DATA = "{GRID_DATA_KEY}";
    const NUMERIC = new Set(['age', 'year', 'gold', 'silver', 'bronze', 'total']);
    const MAX_NUMBER = {max_number};
    let rows = {rows_json};
    let ws = null;

    function escapeHtml(s) {{
        return String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;').replace(/>/g, '&gt;');
    }}

    function render(changed) {{
        const body = document.getElementById('grid-body');
        if (!body) return;
        body.innerHTML = rows.map((row, i) => '<tr>' + COLUMNS.map(c => {{
            const flash = changed && changed.has(i + ':' + c.field) ? ' class="flash"' : '';
            return '<td data-row="' + i + '" data-field="' + c.field + '" contenteditable="' + c.editable + '"' + flash + '>' +
                escapeHtml(row[c.field] ?? '') + '</td>';
        }}).join('') + '</tr>').join('');
    }}

    // Replace the rows wholesale, flashing cells whose value changed
    function setRowData(newRows) {{
        if (!Array.isArray(newRows)) return;
        const changed = new Set();
        newRows.forEach((row, i) => COLUMNS.forEach(c => {{
            if (!rows[i] || rows[i][c.field] !== row[c.field]) changed.add(i + ':' + c.field);
        }}));
        rows = newRows;
        render(changed);
    }}

    function getRowData() {{
        return rows.map(r => Object.assign({{}}, r));
    }}

    function setViewers(count) {{
        const el = document.getElementById('viewer-count');
        if (el) el.textContent = count;
    }}

    function setConnStatus(status, text) {{
        const el = document.getElementById('conn-status');
        if (!el) return;
        el.textContent = text;
        el.className = 'conn-status ' + status;
    }}

    function commitCell(td) {{
        const i = parseInt(td.dataset.row, 10);
        const field = td.dataset.field;
        if (!rows[i]) return;
        let value = td.textContent.trim();
        if (NUMERIC.has(field)) {{
            const n = parseInt(value, 10);
            if (isNaN(n) || n < 0 || n > MAX_NUMBER) {{
                td.textContent = rows[i][field];
                return;
            }}
            value = n;
        }}
        if (rows[i][field] === value) return;
        rows[i][field] = value;

        console.info('Cell Value Changed');
        if (ws && ws.readyState === WebSocket.OPEN) {{
            ws.send(JSON.stringify({{ type: 'set', key: GRID_DATA, value: getRowData() }}));
        }}
    }}

    document.addEventListener('focusout', e => {{
        if (e.target.matches && e.target.matches('td[data-field]')) commitCell(e.target);
    }});
    document.addEventListener('keydown', e => {{
        if (e.key === 'Enter' && e.target.matches && e.target.matches('td[data-field]')) {{
            e.preventDefault();
            e.target.blur();
        }}
    }});

    async function getSession() {{
        let id = window.location.hash.substring(1);
        if (!id) {{
            const res = await fetch('/api/sessions', {{ method: 'POST' }});
            if (!res.ok) throw new Error('create failed: ' + res.status);
            id = (await res.json()).id;
            window.location.hash = id;
        }}
        return id;
    }}

    function connect(id) {{
        const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
        ws = new WebSocket(protocol + '//' + window.location.host + '/api/sessions/' + id + '/ws');
        setConnStatus('', 'Connecting...');

        ws.onopen = () => setConnStatus('connected', 'Connected');
        ws.onclose = () => setConnStatus('disconnected', 'Disconnected');
        ws.onmessage = e => {{
            let msg;
            try {{ msg = JSON.parse(e.data); }} catch (err) {{ return; }}
            switch (msg.type) {{
                case 'init':
                    setViewers(msg.peers);
                    if (msg.gridData) setRowData(msg.gridData);
                    break;
                case 'value_changed':
                    if (msg.key === GRID_DATA && msg.value) setRowData(msg.value);
                    break;
                case 'peers':
                    setViewers(msg.count);
                    break;
            }}
        }};
    }}

    getSession().then(connect).catch(err => {{
        console.error('Session bootstrap failed:', err);
        setConnStatus('disconnected', 'Offline');
    }});
}})();
</script>"##,
        columns_json = script_json(columns),
        rows_json = script_json(rows),
        max_number = u32::MAX,
    )
}

/// Full page: header, editable grid and sync script.
pub fn render_grid_page(columns: &[ColumnDef], rows: &[OlympicRow]) -> String {
    base_html(
        "Fluid Demo",
        &render_table(columns, rows),
        &render_sync_script(columns, rows),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_columns, default_rows};

    #[test]
    fn test_table_has_editable_cells() {
        let html = render_table(&default_columns(), &default_rows());
        assert!(html.contains("<th>athlete</th><th>age</th><th>country</th>"));
        assert!(html.contains(
            r#"<td data-row="0" data-field="age" contenteditable="true">23</td>"#
        ));
        assert!(!html.contains("Swimming"));
    }

    #[test]
    fn test_colgroup_follows_flex() {
        let html = render_table(&default_columns(), &default_rows());
        assert!(html.contains(
            r#"<colgroup><col style="width: 33.3%"><col style="width: 33.3%"><col style="width: 33.3%"></colgroup>"#
        ));

        let mut columns = default_columns();
        columns[0].flex = 2;
        columns[1].flex = 1;
        columns[2].flex = 1;
        let html = render_colgroup(&columns);
        assert_eq!(
            html,
            r#"<colgroup><col style="width: 50.0%"><col style="width: 25.0%"><col style="width: 25.0%"></colgroup>"#
        );
    }

    #[test]
    fn test_table_escapes_cells() {
        let mut rows = default_rows();
        rows[0].athlete = "<b>Bold</b>".to_string();
        let html = render_table(&default_columns(), &rows);
        assert!(html.contains("&lt;b&gt;Bold&lt;/b&gt;"));
    }

    #[test]
    fn test_script_json_cannot_close_script() {
        let json = script_json(&["</script><script>alert(1)"]);
        assert!(!json.contains("</script>"));
    }

    #[test]
    fn test_page_wires_protocol() {
        let html = render_grid_page(&default_columns(), &default_rows());
        assert!(html.contains(r#"const GRID_DATA = "gridData";"#));
        assert!(html.contains("/api/sessions"));
        assert!(html.contains("window.location.hash = id"));
        assert!(html.contains("Michael Phelps"));
    }

    #[test]
    fn test_script_rejects_counts_beyond_u32() {
        let html = render_grid_page(&default_columns(), &default_rows());
        assert!(html.contains("const MAX_NUMBER = 4294967295;"));
        assert!(html.contains("n < 0 || n > MAX_NUMBER"));
    }
}
