//! VT100/ANSI screen model.
//!
//! Bytes read from the PTY are fed through `vte` into a grid of [`Cell`]s.
//! The grid renders to a raster image (font8x8 glyphs, 2x scale) or to an
//! SVG document with one `<text>` run per row segment, and can be searched
//! for visible labels so pointer interactions can locate their targets.

use std::fmt::Write as _;

use font8x8::{
    BASIC_FONTS, BLOCK_FONTS, BOX_FONTS, GREEK_FONTS, HIRAGANA_FONTS, LATIN_FONTS, MISC_FONTS,
    UnicodeFonts,
};
use image::{ImageBuffer, Rgb, RgbImage};
use vte::{Params, Parser, Perform};

const GLYPH_WIDTH: u32 = 8;
const GLYPH_HEIGHT: u32 = 16;
const PIXEL_SCALE: u32 = 2;
/// Width of a terminal cell in pixels
pub const CELL_WIDTH: u32 = GLYPH_WIDTH * PIXEL_SCALE;
/// Height of a terminal cell in pixels
pub const CELL_HEIGHT: u32 = GLYPH_HEIGHT * PIXEL_SCALE;

pub type Rgb8 = [u8; 3];

const DEFAULT_FG: Rgb8 = [229, 229, 229];
const DEFAULT_BG: Rgb8 = [0, 0, 0];

const PALETTE: [Rgb8; 16] = [
    [0, 0, 0],
    [205, 49, 49],
    [13, 188, 121],
    [229, 229, 16],
    [36, 114, 200],
    [188, 63, 188],
    [17, 168, 205],
    [229, 229, 229],
    [102, 102, 102],
    [241, 76, 76],
    [35, 209, 139],
    [245, 245, 67],
    [59, 142, 234],
    [214, 112, 214],
    [41, 184, 219],
    [255, 255, 255],
];

fn indexed_color(idx: u8) -> Rgb8 {
    match idx {
        0..=15 => PALETTE[idx as usize],
        16..=231 => {
            const STEPS: [u8; 6] = [0, 95, 135, 175, 215, 255];
            let n = idx - 16;
            [
                STEPS[(n / 36) as usize],
                STEPS[((n % 36) / 6) as usize],
                STEPS[(n % 6) as usize],
            ]
        }
        232..=255 => {
            let shade = 8 + (idx - 232) * 10;
            [shade, shade, shade]
        }
    }
}

fn bold_color(c: Rgb8) -> Rgb8 {
    c.map(|v| v.saturating_add(64).max(v.saturating_mul(4) / 3))
}

/// font8x8 glyph, rows doubled to fill a 16 pixel cell.
fn glyph(ch: char) -> [u8; 16] {
    let found = BASIC_FONTS
        .get(ch)
        .or_else(|| BOX_FONTS.get(ch))
        .or_else(|| BLOCK_FONTS.get(ch))
        .or_else(|| LATIN_FONTS.get(ch))
        .or_else(|| GREEK_FONTS.get(ch))
        .or_else(|| HIRAGANA_FONTS.get(ch))
        .or_else(|| MISC_FONTS.get(ch));

    let mut out = [0u8; 16];
    if let Some(rows) = found {
        for (i, row) in rows.iter().enumerate() {
            out[i * 2] = *row;
            out[i * 2 + 1] = *row;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub bold: bool,
    pub underline: bool,
    pub inverse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub fg: Rgb8,
    pub bg: Rgb8,
    pub style: Style,
}

impl Cell {
    fn blank(fg: Rgb8, bg: Rgb8) -> Self {
        Self {
            ch: ' ',
            fg,
            bg,
            style: Style::default(),
        }
    }

    /// Foreground and background after inverse and bold are applied.
    fn resolved_colors(&self) -> (Rgb8, Rgb8) {
        let (mut fg, bg) = if self.style.inverse {
            (self.bg, self.fg)
        } else {
            (self.fg, self.bg)
        };
        if self.style.bold {
            fg = bold_color(fg);
        }
        (fg, bg)
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank(DEFAULT_FG, DEFAULT_BG)
    }
}

/// Character grid plus cursor and pen state.
#[derive(Debug, Clone)]
pub struct Screen {
    cols: u16,
    rows: u16,
    grid: Vec<Vec<Cell>>,
    cursor: (u16, u16),
    saved_cursor: Option<(u16, u16)>,
    pen_fg: Rgb8,
    pen_bg: Rgb8,
    pen_style: Style,
    primary: Option<Vec<Vec<Cell>>>,
}

impl Screen {
    pub fn new(cols: u16, rows: u16) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            grid: vec![vec![Cell::default(); cols as usize]; rows as usize],
            cursor: (0, 0),
            saved_cursor: None,
            pen_fg: DEFAULT_FG,
            pen_bg: DEFAULT_BG,
            pen_style: Style::default(),
            primary: None,
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cursor(&self) -> (u16, u16) {
        self.cursor
    }

    pub fn cell(&self, col: u16, row: u16) -> Option<&Cell> {
        self.grid.get(row as usize)?.get(col as usize)
    }

    fn blank_row(&self) -> Vec<Cell> {
        vec![Cell::blank(DEFAULT_FG, DEFAULT_BG); self.cols as usize]
    }

    fn pen_blank(&self) -> Cell {
        Cell::blank(self.pen_fg, self.pen_bg)
    }

    pub fn clear(&mut self) {
        let blank = self.pen_blank();
        for row in &mut self.grid {
            row.fill(blank);
        }
        self.cursor = (0, 0);
    }

    fn line_feed(&mut self) {
        if self.cursor.1 + 1 >= self.rows {
            self.grid.remove(0);
            let row = self.blank_row();
            self.grid.push(row);
        } else {
            self.cursor.1 += 1;
        }
    }

    pub fn put_char(&mut self, ch: char) {
        if self.cursor.0 >= self.cols {
            self.cursor.0 = 0;
            self.line_feed();
        }
        let (col, row) = self.cursor;
        self.grid[row as usize][col as usize] = Cell {
            ch,
            fg: self.pen_fg,
            bg: self.pen_bg,
            style: self.pen_style,
        };
        self.cursor.0 += 1;
    }

    pub fn move_to(&mut self, col: u16, row: u16) {
        self.cursor = (col.min(self.cols - 1), row.min(self.rows - 1));
    }

    pub fn move_by(&mut self, dcol: i32, drow: i32) {
        let col = (i32::from(self.cursor.0) + dcol).clamp(0, i32::from(self.cols) - 1);
        let row = (i32::from(self.cursor.1) + drow).clamp(0, i32::from(self.rows) - 1);
        self.cursor = (col as u16, row as u16);
    }

    fn erase_line(&mut self, mode: u16) {
        let blank = self.pen_blank();
        let (col, row) = self.cursor;
        let col = col.min(self.cols) as usize;
        let end = (col + 1).min(self.cols as usize);
        let line = &mut self.grid[row as usize];
        match mode {
            0 => line[col..].fill(blank),
            1 => line[..end].fill(blank),
            _ => line.fill(blank),
        }
    }

    fn erase_display(&mut self, mode: u16) {
        let blank = self.pen_blank();
        let row = self.cursor.1 as usize;
        match mode {
            0 => {
                self.erase_line(0);
                for line in &mut self.grid[row + 1..] {
                    line.fill(blank);
                }
            }
            1 => {
                for line in &mut self.grid[..row] {
                    line.fill(blank);
                }
                self.erase_line(1);
            }
            _ => {
                for line in &mut self.grid {
                    line.fill(blank);
                }
            }
        }
    }

    fn enter_alternate(&mut self) {
        if self.primary.is_none() {
            let fresh = vec![self.blank_row(); self.rows as usize];
            self.primary = Some(std::mem::replace(&mut self.grid, fresh));
        }
    }

    fn leave_alternate(&mut self) {
        if let Some(grid) = self.primary.take() {
            self.grid = grid;
        }
    }

    fn reset_pen(&mut self) {
        self.pen_fg = DEFAULT_FG;
        self.pen_bg = DEFAULT_BG;
        self.pen_style = Style::default();
    }

    fn apply_sgr(&mut self, values: &[u16]) {
        if values.is_empty() {
            self.reset_pen();
            return;
        }
        let mut i = 0;
        while i < values.len() {
            let v = values[i];
            match v {
                0 => self.reset_pen(),
                1 => self.pen_style.bold = true,
                4 => self.pen_style.underline = true,
                7 => self.pen_style.inverse = true,
                22 => self.pen_style.bold = false,
                24 => self.pen_style.underline = false,
                27 => self.pen_style.inverse = false,
                30..=37 => self.pen_fg = PALETTE[(v - 30) as usize],
                40..=47 => self.pen_bg = PALETTE[(v - 40) as usize],
                90..=97 => self.pen_fg = PALETTE[(v - 90 + 8) as usize],
                100..=107 => self.pen_bg = PALETTE[(v - 100 + 8) as usize],
                39 => self.pen_fg = DEFAULT_FG,
                49 => self.pen_bg = DEFAULT_BG,
                38 | 48 => {
                    let color = match values.get(i + 1) {
                        Some(5) => values.get(i + 2).map(|&n| {
                            i += 2;
                            indexed_color(n.min(255) as u8)
                        }),
                        Some(2) if i + 4 < values.len() => {
                            let rgb = [
                                values[i + 2].min(255) as u8,
                                values[i + 3].min(255) as u8,
                                values[i + 4].min(255) as u8,
                            ];
                            i += 4;
                            Some(rgb)
                        }
                        _ => None,
                    };
                    match color {
                        Some(c) if v == 38 => self.pen_fg = c,
                        Some(c) => self.pen_bg = c,
                        None => break,
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// Visible text, one line per row, trailing blanks trimmed.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for row in &self.grid {
            let line: String = row.iter().map(|c| c.ch).collect();
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }

    /// Text of a single row.
    pub fn row_text(&self, row: u16) -> String {
        self.grid
            .get(row as usize)
            .map(|cells| cells.iter().map(|c| c.ch).collect())
            .unwrap_or_default()
    }

    /// First on-screen occurrence of `needle` as `(col, row)` of its first cell.
    pub fn find_text(&self, needle: &str) -> Option<(u16, u16)> {
        if needle.is_empty() {
            return None;
        }
        let needle: Vec<char> = needle.chars().collect();
        for (row, cells) in self.grid.iter().enumerate() {
            let line: Vec<char> = cells.iter().map(|c| c.ch).collect();
            if let Some(col) = line.windows(needle.len()).position(|w| w == needle.as_slice()) {
                return Some((col as u16, row as u16));
            }
        }
        None
    }

    pub fn render_image(&self) -> RgbImage {
        let width = u32::from(self.cols) * CELL_WIDTH;
        let height = u32::from(self.rows) * CELL_HEIGHT;
        let mut img: RgbImage = ImageBuffer::new(width, height);

        for (row, cells) in self.grid.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                let (fg, bg) = cell.resolved_colors();
                let bitmap = glyph(cell.ch);
                let origin_x = col as u32 * CELL_WIDTH;
                let origin_y = row as u32 * CELL_HEIGHT;
                for (gy, bits) in bitmap.iter().enumerate() {
                    let underline = cell.style.underline && gy as u32 >= GLYPH_HEIGHT - 2;
                    for gx in 0..GLYPH_WIDTH {
                        // font8x8 stores the leftmost pixel in the least significant bit
                        let lit = (bits >> gx) & 1 == 1 || underline;
                        let color = Rgb(if lit { fg } else { bg });
                        for sy in 0..PIXEL_SCALE {
                            for sx in 0..PIXEL_SCALE {
                                img.put_pixel(
                                    origin_x + gx * PIXEL_SCALE + sx,
                                    origin_y + gy as u32 * PIXEL_SCALE + sy,
                                    color,
                                );
                            }
                        }
                    }
                }
            }
        }
        img
    }

    /// PNG-encoded raster of the screen.
    pub fn render_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut bytes = Vec::new();
        self.render_image()
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }

    /// SVG document: a background rect per colored run, a text element per styled run.
    pub fn render_svg(&self, title: &str) -> String {
        let width = u32::from(self.cols) * CELL_WIDTH;
        let height = u32::from(self.rows) * CELL_HEIGHT;
        let mut svg = String::new();
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {width} {height}" width="{width}" height="{height}" font-family="monospace" font-size="{}">"#,
            CELL_HEIGHT - 6
        );
        let _ = writeln!(svg, "<title>{}</title>", escape_xml(title));
        let _ = writeln!(
            svg,
            r#"<rect x="0" y="0" width="{width}" height="{height}" fill="{}"/>"#,
            hex(DEFAULT_BG)
        );

        for (row, cells) in self.grid.iter().enumerate() {
            let y = row as u32 * CELL_HEIGHT;
            let mut col = 0;
            while col < cells.len() {
                let (fg, bg) = cells[col].resolved_colors();
                let style = cells[col].style;
                let start = col;
                while col < cells.len() {
                    let (f, b) = cells[col].resolved_colors();
                    if f != fg || b != bg || cells[col].style.underline != style.underline {
                        break;
                    }
                    col += 1;
                }
                let x = start as u32 * CELL_WIDTH;
                let run_width = (col - start) as u32 * CELL_WIDTH;
                if bg != DEFAULT_BG {
                    let _ = writeln!(
                        svg,
                        r#"<rect x="{x}" y="{y}" width="{run_width}" height="{CELL_HEIGHT}" fill="{}"/>"#,
                        hex(bg)
                    );
                }
                let text: String = cells[start..col].iter().map(|c| c.ch).collect();
                if text.trim().is_empty() {
                    continue;
                }
                let decoration = if style.underline {
                    r#" text-decoration="underline""#
                } else {
                    ""
                };
                let weight = if style.bold { r#" font-weight="bold""# } else { "" };
                let _ = writeln!(
                    svg,
                    r#"<text x="{x}" y="{}" fill="{}" xml:space="preserve"{weight}{decoration}>{}</text>"#,
                    y + CELL_HEIGHT - 8,
                    hex(fg),
                    escape_xml(&text)
                );
            }
        }
        svg.push_str("</svg>\n");
        svg
    }
}

fn hex(c: Rgb8) -> String {
    format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c if c.is_control() => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

struct Performer<'a> {
    screen: &'a mut Screen,
}

fn first_param(params: &Params, index: usize, default: u16) -> u16 {
    params
        .iter()
        .nth(index)
        .and_then(|p| p.first())
        .copied()
        .filter(|v| *v != 0)
        .unwrap_or(default)
}

impl Perform for Performer<'_> {
    fn print(&mut self, c: char) {
        self.screen.put_char(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | 0x0b | 0x0c => self.screen.line_feed(),
            b'\r' => self.screen.cursor.0 = 0,
            b'\t' => {
                let next = (self.screen.cursor.0 / 8 + 1) * 8;
                self.screen.cursor.0 = next.min(self.screen.cols - 1);
            }
            0x08 => self.screen.move_by(-1, 0),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, action: char) {
        let private = intermediates.contains(&b'?');
        let n = || i32::from(first_param(params, 0, 1));
        match action {
            'H' | 'f' => {
                let row = first_param(params, 0, 1) - 1;
                let col = first_param(params, 1, 1) - 1;
                self.screen.move_to(col, row);
            }
            'A' => self.screen.move_by(0, -n()),
            'B' => self.screen.move_by(0, n()),
            'C' => self.screen.move_by(n(), 0),
            'D' => self.screen.move_by(-n(), 0),
            'G' => {
                let row = self.screen.cursor.1;
                self.screen.move_to(first_param(params, 0, 1) - 1, row);
            }
            'd' => {
                let col = self.screen.cursor.0;
                self.screen.move_to(col, first_param(params, 0, 1) - 1);
            }
            'J' => self.screen.erase_display(first_param(params, 0, 0)),
            'K' => self.screen.erase_line(first_param(params, 0, 0)),
            'm' => {
                let values: Vec<u16> = params.iter().flat_map(|p| p.iter().copied()).collect();
                self.screen.apply_sgr(&values);
            }
            's' => self.screen.saved_cursor = Some(self.screen.cursor),
            'u' => {
                if let Some((col, row)) = self.screen.saved_cursor {
                    self.screen.move_to(col, row);
                }
            }
            'h' | 'l' if private => {
                if matches!(first_param(params, 0, 0), 47 | 1047 | 1049) {
                    if action == 'h' {
                        self.screen.enter_alternate();
                    } else {
                        self.screen.leave_alternate();
                    }
                }
            }
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, byte: u8) {
        match byte {
            b'7' => self.screen.saved_cursor = Some(self.screen.cursor),
            b'8' => {
                if let Some((col, row)) = self.screen.saved_cursor {
                    self.screen.move_to(col, row);
                }
            }
            b'c' => {
                self.screen.reset_pen();
                self.screen.clear();
            }
            _ => {}
        }
    }
}

/// Screen plus the escape-sequence parser feeding it.
pub struct Terminal {
    screen: Screen,
    parser: Parser,
}

impl Terminal {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            screen: Screen::new(cols, rows),
            parser: Parser::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        let mut performer = Performer {
            screen: &mut self.screen,
        };
        for &byte in bytes {
            self.parser.advance(&mut performer, byte);
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }
}
