/// Catppuccin Mocha color palette
/// Inspired by https://catppuccin.com/palette
///
/// Color constants for the `colored` crate, covering the shades the chat
/// output uses.

pub const MAUVE: (u8, u8, u8) = (203, 166, 247);
pub const RED: (u8, u8, u8) = (243, 139, 168);
pub const YELLOW: (u8, u8, u8) = (249, 226, 175);
pub const GREEN: (u8, u8, u8) = (166, 227, 161);
pub const SAPPHIRE: (u8, u8, u8) = (116, 199, 236);
pub const BLUE: (u8, u8, u8) = (137, 180, 250);

// Overlay colors
pub const OVERLAY1: (u8, u8, u8) = (127, 132, 156);
pub const OVERLAY0: (u8, u8, u8) = (108, 112, 134);
