//! 5x5 glyphs for the LED matrix.
//!
//! Each glyph is five rows; bit 4 of a row is the leftmost column.

use microbit_sandbox_types::{LedGrid, GRID_SIZE, MAX_BRIGHTNESS};

type Glyph = [u8; GRID_SIZE];

const UNKNOWN: Glyph = [0b01100, 0b10010, 0b00100, 0b00000, 0b00100];

fn glyph(ch: char) -> Glyph {
    match ch.to_ascii_uppercase() {
        ' ' => [0; GRID_SIZE],
        'A' => [0b01100, 0b10010, 0b11110, 0b10010, 0b10010],
        'B' => [0b11100, 0b10010, 0b11100, 0b10010, 0b11100],
        'C' => [0b01110, 0b10000, 0b10000, 0b10000, 0b01110],
        'D' => [0b11100, 0b10010, 0b10010, 0b10010, 0b11100],
        'E' => [0b11110, 0b10000, 0b11100, 0b10000, 0b11110],
        'F' => [0b11110, 0b10000, 0b11100, 0b10000, 0b10000],
        'G' => [0b01110, 0b10000, 0b10011, 0b10001, 0b01110],
        'H' => [0b10010, 0b10010, 0b11110, 0b10010, 0b10010],
        'I' => [0b11100, 0b01000, 0b01000, 0b01000, 0b11100],
        'J' => [0b11111, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10010, 0b10100, 0b11000, 0b10100, 0b10010],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b11110],
        'M' => [0b10001, 0b11011, 0b10101, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001],
        'O' | '0' => [0b01100, 0b10010, 0b10010, 0b10010, 0b01100],
        'P' => [0b11100, 0b10010, 0b11100, 0b10000, 0b10000],
        'Q' => [0b01100, 0b10010, 0b10010, 0b01100, 0b00011],
        'R' => [0b11100, 0b10010, 0b11100, 0b10100, 0b10010],
        'S' => [0b01110, 0b10000, 0b01100, 0b00010, 0b11100],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10010, 0b10010, 0b10010, 0b10010, 0b01100],
        'V' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10101, 0b11011, 0b10001],
        'X' => [0b10010, 0b10010, 0b01100, 0b10010, 0b10010],
        'Y' => [0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11110, 0b00100, 0b01000, 0b10000, 0b11110],
        '1' => [0b01000, 0b11000, 0b01000, 0b01000, 0b11100],
        '2' => [0b11100, 0b00010, 0b01100, 0b10000, 0b11110],
        '3' => [0b11110, 0b00010, 0b00100, 0b10010, 0b01100],
        '4' => [0b00110, 0b01010, 0b10010, 0b11111, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b11110],
        '6' => [0b00010, 0b00100, 0b01110, 0b10001, 0b01110],
        '7' => [0b11111, 0b00010, 0b00100, 0b01000, 0b10000],
        '8' => [0b01110, 0b10001, 0b01110, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b01110, 0b00100, 0b01000],
        '!' => [0b01000, 0b01000, 0b01000, 0b00000, 0b01000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b01000],
        ',' => [0b00000, 0b00000, 0b00000, 0b01000, 0b10000],
        '-' => [0b00000, 0b00000, 0b11100, 0b00000, 0b00000],
        '+' => [0b00000, 0b01000, 0b11100, 0b01000, 0b00000],
        '=' => [0b00000, 0b11110, 0b00000, 0b11110, 0b00000],
        ':' => [0b00000, 0b01000, 0b00000, 0b01000, 0b00000],
        '\'' => [0b01000, 0b01000, 0b00000, 0b00000, 0b00000],
        '/' => [0b00001, 0b00010, 0b00100, 0b01000, 0b10000],
        _ => UNKNOWN,
    }
}

fn column(g: &Glyph, col: usize) -> [bool; GRID_SIZE] {
    let mut out = [false; GRID_SIZE];
    for (row, bits) in g.iter().enumerate() {
        out[row] = bits & (1 << (GRID_SIZE - 1 - col)) != 0;
    }
    out
}

/// A single character centred on the matrix.
pub fn char_frame(ch: char) -> LedGrid {
    let g = glyph(ch);
    let mut frame = [[0; GRID_SIZE]; GRID_SIZE];
    for col in 0..GRID_SIZE {
        for (row, lit) in column(&g, col).into_iter().enumerate() {
            if lit {
                frame[row][col] = MAX_BRIGHTNESS;
            }
        }
    }
    frame
}

/// Columns of `text` padded by a blank screen on each side, one glyph
/// column plus a one-column gap per character.
pub fn scroll_columns(text: &str) -> Vec<[bool; GRID_SIZE]> {
    let blank = [false; GRID_SIZE];
    let mut columns = vec![blank; GRID_SIZE];
    for ch in text.chars() {
        let g = glyph(ch);
        columns.extend((0..GRID_SIZE).map(|c| column(&g, c)));
        columns.push(blank);
    }
    columns.extend(std::iter::repeat(blank).take(GRID_SIZE));
    columns
}

/// The five columns starting at `offset`.
pub fn window(columns: &[[bool; GRID_SIZE]], offset: usize) -> LedGrid {
    let mut frame = [[0; GRID_SIZE]; GRID_SIZE];
    for x in 0..GRID_SIZE {
        let Some(col) = columns.get(offset + x) else {
            break;
        };
        for (y, &lit) in col.iter().enumerate() {
            if lit {
                frame[y][x] = MAX_BRIGHTNESS;
            }
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_uses_uppercase_glyph() {
        assert_eq!(char_frame('a'), char_frame('A'));
        assert_eq!(char_frame('~'), char_frame('?'));
    }

    #[test]
    fn test_scroll_columns_pad_both_sides() {
        let columns = scroll_columns("HI");
        assert_eq!(columns.len(), 5 + 2 * 6 + 5);
        assert_eq!(window(&columns, 0), [[0; 5]; 5]);
        assert_eq!(window(&columns, 5), char_frame('H'));
        assert_eq!(window(&columns, columns.len() - 5), [[0; 5]; 5]);
    }
}
