//! Virtual key code constants and classification.
//!
//! Codes follow the macOS virtual keycode space, which is what the reference
//! captures were recorded against. Only the keys the default layouts use are
//! named here; anything else still flows through as a plain `u16`.

use crate::ModifierKind;

pub const VK_ANSI_A: u16 = 0x00;
pub const VK_ANSI_S: u16 = 0x01;
pub const VK_ANSI_D: u16 = 0x02;
pub const VK_ANSI_F: u16 = 0x03;
pub const VK_ANSI_H: u16 = 0x04;
pub const VK_ANSI_G: u16 = 0x05;
pub const VK_ANSI_Z: u16 = 0x06;
pub const VK_ANSI_X: u16 = 0x07;
pub const VK_ANSI_C: u16 = 0x08;
pub const VK_ANSI_V: u16 = 0x09;
pub const VK_ANSI_B: u16 = 0x0B;
pub const VK_ANSI_Q: u16 = 0x0C;
pub const VK_ANSI_W: u16 = 0x0D;
pub const VK_ANSI_E: u16 = 0x0E;
pub const VK_ANSI_R: u16 = 0x0F;
pub const VK_ANSI_Y: u16 = 0x10;
pub const VK_ANSI_T: u16 = 0x11;
pub const VK_ANSI_1: u16 = 0x12;
pub const VK_ANSI_2: u16 = 0x13;
pub const VK_ANSI_3: u16 = 0x14;
pub const VK_ANSI_4: u16 = 0x15;
pub const VK_ANSI_6: u16 = 0x16;
pub const VK_ANSI_5: u16 = 0x17;
pub const VK_ANSI_EQUAL: u16 = 0x18;
pub const VK_ANSI_9: u16 = 0x19;
pub const VK_ANSI_7: u16 = 0x1A;
pub const VK_ANSI_MINUS: u16 = 0x1B;
pub const VK_ANSI_8: u16 = 0x1C;
pub const VK_ANSI_0: u16 = 0x1D;
pub const VK_ANSI_RIGHT_BRACKET: u16 = 0x1E;
pub const VK_ANSI_O: u16 = 0x1F;
pub const VK_ANSI_U: u16 = 0x20;
pub const VK_ANSI_LEFT_BRACKET: u16 = 0x21;
pub const VK_ANSI_I: u16 = 0x22;
pub const VK_ANSI_P: u16 = 0x23;
pub const VK_RETURN: u16 = 0x24;
pub const VK_ANSI_L: u16 = 0x25;
pub const VK_ANSI_J: u16 = 0x26;
pub const VK_ANSI_QUOTE: u16 = 0x27;
pub const VK_ANSI_K: u16 = 0x28;
pub const VK_ANSI_SEMICOLON: u16 = 0x29;
pub const VK_ANSI_BACKSLASH: u16 = 0x2A;
pub const VK_ANSI_COMMA: u16 = 0x2B;
pub const VK_ANSI_SLASH: u16 = 0x2C;
pub const VK_ANSI_N: u16 = 0x2D;
pub const VK_ANSI_M: u16 = 0x2E;
pub const VK_ANSI_PERIOD: u16 = 0x2F;
pub const VK_TAB: u16 = 0x30;
pub const VK_SPACE: u16 = 0x31;
pub const VK_ANSI_GRAVE: u16 = 0x32;
pub const VK_DELETE: u16 = 0x33;
pub const VK_ESCAPE: u16 = 0x35;
pub const VK_RIGHT_COMMAND: u16 = 0x36;
pub const VK_COMMAND: u16 = 0x37;
pub const VK_SHIFT: u16 = 0x38;
pub const VK_CAPS_LOCK: u16 = 0x39;
pub const VK_OPTION: u16 = 0x3A;
pub const VK_CONTROL: u16 = 0x3B;
pub const VK_RIGHT_SHIFT: u16 = 0x3C;
pub const VK_RIGHT_OPTION: u16 = 0x3D;
pub const VK_RIGHT_CONTROL: u16 = 0x3E;
pub const VK_FORWARD_DELETE: u16 = 0x75;
pub const VK_LEFT_ARROW: u16 = 0x7B;
pub const VK_RIGHT_ARROW: u16 = 0x7C;
pub const VK_DOWN_ARROW: u16 = 0x7D;
pub const VK_UP_ARROW: u16 = 0x7E;

/// Classify a virtual key as one of the four modifier classes.
pub const fn modifier_kind(vk: u16) -> Option<ModifierKind> {
    match vk {
        VK_SHIFT | VK_RIGHT_SHIFT => Some(ModifierKind::Shift),
        VK_CONTROL | VK_RIGHT_CONTROL => Some(ModifierKind::Control),
        VK_OPTION | VK_RIGHT_OPTION => Some(ModifierKind::Option),
        VK_COMMAND | VK_RIGHT_COMMAND => Some(ModifierKind::Command),
        _ => None,
    }
}

pub const fn is_modifier(vk: u16) -> bool {
    modifier_kind(vk).is_some()
}

/// Canonical (left-hand) virtual key for a modifier class.
pub const fn modifier_vk(kind: ModifierKind) -> u16 {
    match kind {
        ModifierKind::Shift => VK_SHIFT,
        ModifierKind::Control => VK_CONTROL,
        ModifierKind::Option => VK_OPTION,
        ModifierKind::Command => VK_COMMAND,
    }
}

/// Diagnostic name for a virtual key. Unknown codes report as `"vk"`; callers
/// that need the number log the code alongside.
pub const fn name(vk: u16) -> &'static str {
    match vk {
        VK_ANSI_A => "a",
        VK_ANSI_B => "b",
        VK_ANSI_C => "c",
        VK_ANSI_D => "d",
        VK_ANSI_E => "e",
        VK_ANSI_F => "f",
        VK_ANSI_G => "g",
        VK_ANSI_H => "h",
        VK_ANSI_I => "i",
        VK_ANSI_J => "j",
        VK_ANSI_K => "k",
        VK_ANSI_L => "l",
        VK_ANSI_M => "m",
        VK_ANSI_N => "n",
        VK_ANSI_O => "o",
        VK_ANSI_P => "p",
        VK_ANSI_Q => "q",
        VK_ANSI_R => "r",
        VK_ANSI_S => "s",
        VK_ANSI_T => "t",
        VK_ANSI_U => "u",
        VK_ANSI_V => "v",
        VK_ANSI_W => "w",
        VK_ANSI_X => "x",
        VK_ANSI_Y => "y",
        VK_ANSI_Z => "z",
        VK_ANSI_0 => "0",
        VK_ANSI_1 => "1",
        VK_ANSI_2 => "2",
        VK_ANSI_3 => "3",
        VK_ANSI_4 => "4",
        VK_ANSI_5 => "5",
        VK_ANSI_6 => "6",
        VK_ANSI_7 => "7",
        VK_ANSI_8 => "8",
        VK_ANSI_9 => "9",
        VK_ANSI_MINUS => "-",
        VK_ANSI_EQUAL => "=",
        VK_ANSI_LEFT_BRACKET => "[",
        VK_ANSI_RIGHT_BRACKET => "]",
        VK_ANSI_BACKSLASH => "\\",
        VK_ANSI_SEMICOLON => ";",
        VK_ANSI_QUOTE => "'",
        VK_ANSI_COMMA => ",",
        VK_ANSI_PERIOD => ".",
        VK_ANSI_SLASH => "/",
        VK_ANSI_GRAVE => "`",
        VK_TAB => "tab",
        VK_SPACE => "space",
        VK_DELETE => "delete",
        VK_FORWARD_DELETE => "fwd-delete",
        VK_RETURN => "return",
        VK_ESCAPE => "escape",
        VK_SHIFT | VK_RIGHT_SHIFT => "shift",
        VK_CONTROL | VK_RIGHT_CONTROL => "control",
        VK_OPTION | VK_RIGHT_OPTION => "option",
        VK_COMMAND | VK_RIGHT_COMMAND => "command",
        VK_CAPS_LOCK => "caps",
        VK_LEFT_ARROW => "left",
        VK_RIGHT_ARROW => "right",
        VK_UP_ARROW => "up",
        VK_DOWN_ARROW => "down",
        _ => "vk",
    }
}

/// Keys whose hold naturally streams (arrows, deletes, space): the layout
/// builder marks these bindings continuous so hold starts auto-repeat.
pub const fn is_continuous(vk: u16) -> bool {
    matches!(
        vk,
        VK_DELETE
            | VK_FORWARD_DELETE
            | VK_SPACE
            | VK_LEFT_ARROW
            | VK_RIGHT_ARROW
            | VK_UP_ARROW
            | VK_DOWN_ARROW
    )
}
