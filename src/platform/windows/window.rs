//! Top-level window enumeration.

use anyhow::Result;
use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;

use windows::Win32::Foundation::{BOOL, HWND, LPARAM, TRUE};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowTextLengthW, GetWindowTextW, IsWindowVisible,
};

use crate::platform::WindowDetect;

pub struct TopLevelWindows;

impl WindowDetect for TopLevelWindows {
    /// Titles of all visible top-level windows that have one.
    fn window_titles(&self) -> Result<Vec<String>> {
        unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
            unsafe {
                let titles = &mut *(lparam.0 as *mut Vec<String>);

                if !IsWindowVisible(hwnd).as_bool() {
                    return TRUE;
                }

                let title_len = GetWindowTextLengthW(hwnd);
                if title_len <= 0 {
                    return TRUE;
                }
                let mut title_buf: Vec<u16> = vec![0; (title_len + 1) as usize];
                let copied = GetWindowTextW(hwnd, &mut title_buf);
                if copied > 0 {
                    let title = OsString::from_wide(&title_buf[..copied as usize])
                        .to_string_lossy()
                        .to_string();
                    titles.push(title);
                }

                TRUE
            }
        }

        let mut titles: Vec<String> = Vec::new();
        unsafe {
            // EnumWindows reports FALSE when a callback stops early; ours never does
            let _ = EnumWindows(Some(enum_callback), LPARAM(&mut titles as *mut _ as isize));
        }
        Ok(titles)
    }
}
