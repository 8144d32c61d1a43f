//! HTML templates and styling for the grid page.
//!
//! ## Module Structure
//!
//! - `styles` - CSS constants
//! - `components` - Navigation bar and base template
//! - `grid` - The editable grid and its sync script

mod components;
mod grid;
mod styles;

pub use components::{base_html, html_escape, nav_bar};
pub use grid::render_grid_page;
pub use styles::STYLE;
