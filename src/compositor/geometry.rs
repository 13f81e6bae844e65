//! Placement of a source rectangle on the canvas.

use crate::config::FitMode;

/// Where a scaled source lands on the canvas. Offsets are negative when the
/// scaled source overflows the canvas on that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

/// Scale `source` onto `canvas` according to `mode`, centering the free axis.
///
/// For [`FitMode::Cover`]: when the source is relatively wider than the
/// canvas (`bw/bh > cw/ch`) it is scaled to the canvas height and centered
/// horizontally, otherwise scaled to the canvas width and centered
/// vertically. [`FitMode::Contain`] makes the opposite choice.
pub fn fit(mode: FitMode, source: (u32, u32), canvas: (u32, u32)) -> Placement {
    let (bw, bh) = (source.0.max(1) as u64, source.1.max(1) as u64);
    let (cw, ch) = (canvas.0 as u64, canvas.1 as u64);

    // bw/bh > cw/ch without division
    let wider = bw * ch > cw * bh;
    let match_height = match mode {
        FitMode::Cover => wider,
        FitMode::Contain => !wider,
        FitMode::Stretch => {
            return Placement {
                x: 0,
                y: 0,
                width: canvas.0,
                height: canvas.1,
            }
        }
    };

    if match_height {
        let width = scale(bw, ch, bh);
        Placement {
            x: centered(cw, width),
            y: 0,
            width: width as u32,
            height: canvas.1,
        }
    } else {
        let height = scale(bh, cw, bw);
        Placement {
            x: 0,
            y: centered(ch, height),
            width: canvas.0,
            height: height as u32,
        }
    }
}

/// Offset that centers `inner` inside `outer` (may be negative)
pub fn centered(outer: u64, inner: u64) -> i64 {
    (outer as i64 - inner as i64) / 2
}

/// `value * num / den`, rounded, never zero
fn scale(value: u64, num: u64, den: u64) -> u64 {
    ((value * num + den / 2) / den).max(1)
}
