//! Mouse, keyboard and clipboard through `SendInput` and the Win32 clipboard.
//!
//! `SendInput` simulates hardware-level input, so the target window receives
//! it like real user input. It moves the actual cursor.

use anyhow::{anyhow, Result};
use std::time::Duration;

use windows::Win32::Foundation::{HANDLE, HWND};
use windows::Win32::System::DataExchange::{
    CloseClipboard, EmptyClipboard, OpenClipboard, SetClipboardData,
};
use windows::Win32::System::Memory::{GlobalAlloc, GlobalFree, GlobalLock, GlobalUnlock, GMEM_MOVEABLE};
use windows::Win32::System::Ole::CF_UNICODETEXT;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, VkKeyScanW, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN,
    MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY, VK_CONTROL,
    VK_ESCAPE, VK_F1, VK_MENU, VK_RETURN, VK_SHIFT, VK_TAB,
};
use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

use crate::platform::{InputControl, Key};

pub struct SendInputControl {
    key_delay: Duration,
}

impl SendInputControl {
    pub fn new(key_delay_ms: u64) -> Self {
        Self {
            key_delay: Duration::from_millis(key_delay_ms),
        }
    }
}

fn mouse_input(x: i32, y: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: x,
                dy: y,
                dwFlags: flags | MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_MOVE,
                ..Default::default()
            },
        },
    }
}

fn key_input(vk: VIRTUAL_KEY, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: vk,
                dwFlags: flags,
                ..Default::default()
            },
        },
    }
}

fn send(inputs: &[INPUT]) -> Result<()> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(anyhow!("SendInput sent {}/{} events", sent, inputs.len()));
    }
    Ok(())
}

fn virtual_key(key: Key) -> Result<VIRTUAL_KEY> {
    let vk = match key {
        Key::Control => VK_CONTROL,
        Key::Alt => VK_MENU,
        Key::Shift => VK_SHIFT,
        Key::Enter => VK_RETURN,
        Key::Escape => VK_ESCAPE,
        Key::Tab => VK_TAB,
        Key::Function(n) => VIRTUAL_KEY(VK_F1.0 + (n as u16).saturating_sub(1)),
        Key::Char(c) if c.is_ascii_alphanumeric() => VIRTUAL_KEY(c.to_ascii_uppercase() as u16),
        Key::Char(c) => {
            let scan = unsafe { VkKeyScanW(c as u16) };
            if scan == -1 {
                return Err(anyhow!("No virtual key for '{}'", c));
            }
            VIRTUAL_KEY((scan as u16) & 0xFF)
        }
    };
    Ok(vk)
}

impl InputControl for SendInputControl {
    fn click(&self, x: i32, y: i32) -> Result<()> {
        let screen_width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
        let screen_height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
        if screen_width <= 0 || screen_height <= 0 {
            return Err(anyhow!("Could not query screen size"));
        }

        // Normalize to 0-65535 range (required by MOUSEEVENTF_ABSOLUTE)
        let norm_x = ((x as i64 * 65535) / screen_width as i64) as i32;
        let norm_y = ((y as i64 * 65535) / screen_height as i64) as i32;

        send(&[mouse_input(norm_x, norm_y, MOUSE_EVENT_FLAGS(0))])?;
        std::thread::sleep(Duration::from_millis(100));
        send(&[mouse_input(norm_x, norm_y, MOUSEEVENTF_LEFTDOWN)])?;
        std::thread::sleep(Duration::from_millis(50));
        send(&[mouse_input(norm_x, norm_y, MOUSEEVENTF_LEFTUP)])?;
        Ok(())
    }

    fn press_keys(&self, keys: &[Key]) -> Result<()> {
        let codes = keys
            .iter()
            .map(|k| virtual_key(*k))
            .collect::<Result<Vec<_>>>()?;

        for vk in &codes {
            send(&[key_input(*vk, KEYBD_EVENT_FLAGS(0))])?;
        }
        std::thread::sleep(self.key_delay);
        for vk in codes.iter().rev() {
            send(&[key_input(*vk, KEYEVENTF_KEYUP)])?;
        }
        Ok(())
    }

    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        let wide: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
        let bytes = wide.len() * std::mem::size_of::<u16>();

        unsafe {
            OpenClipboard(HWND::default())?;
            let result = (|| -> Result<()> {
                EmptyClipboard()?;
                let memory = GlobalAlloc(GMEM_MOVEABLE, bytes)?;
                let target = GlobalLock(memory) as *mut u16;
                if target.is_null() {
                    let _ = GlobalFree(memory);
                    return Err(anyhow!("GlobalLock failed"));
                }
                std::ptr::copy_nonoverlapping(wide.as_ptr(), target, wide.len());
                let _ = GlobalUnlock(memory);

                // The clipboard owns the memory once SetClipboardData succeeds
                if let Err(e) = SetClipboardData(CF_UNICODETEXT.0 as u32, HANDLE(memory.0)) {
                    let _ = GlobalFree(memory);
                    return Err(anyhow!("SetClipboardData failed: {}", e));
                }
                Ok(())
            })();
            let _ = CloseClipboard();
            result
        }
    }
}
