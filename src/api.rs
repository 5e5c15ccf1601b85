//! Static metadata for remote functions.
//!
//! One entry per function: the RPC name, the API level that introduced it
//! and, for deprecated functions, the level that deprecated it and its
//! replacement. Typed wrappers consult [`lookup`] to check support against
//! the level reported by `nvim_get_api_info`.

/// Batched execution entry point used by [`AtomicCallBuilder`](crate::atomic::AtomicCallBuilder).
pub const CALL_ATOMIC: &str = "nvim_call_atomic";

/// Metadata for one remote function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiFunction {
    /// RPC method name.
    pub name: &'static str,
    /// API level that introduced the function.
    pub since: u32,
    /// API level that deprecated it, if any.
    pub deprecated_in: Option<u32>,
    /// Function to use instead once deprecated.
    pub replacement: Option<&'static str>,
}

impl ApiFunction {
    const fn new(name: &'static str, since: u32) -> Self {
        Self {
            name,
            since,
            deprecated_in: None,
            replacement: None,
        }
    }

    const fn deprecated(
        name: &'static str,
        since: u32,
        deprecated_in: u32,
        replacement: &'static str,
    ) -> Self {
        Self {
            name,
            since,
            deprecated_in: Some(deprecated_in),
            replacement: Some(replacement),
        }
    }

    /// Whether a peer at `api_level` provides this function undeprecated.
    pub fn is_available(&self, api_level: u32) -> bool {
        api_level >= self.since && self.deprecated_in.map_or(true, |level| api_level < level)
    }

    /// Whether the function has been deprecated at all.
    pub fn is_deprecated(&self) -> bool {
        self.deprecated_in.is_some()
    }
}

/// Known functions.
pub static FUNCTIONS: &[ApiFunction] = &[
    ApiFunction::new(CALL_ATOMIC, 1),
    ApiFunction::new("nvim_get_api_info", 1),
    ApiFunction::new("nvim_ui_attach", 1),
    ApiFunction::new("nvim_ui_detach", 1),
    ApiFunction::new("nvim_ui_try_resize", 1),
    ApiFunction::new("nvim_ui_set_option", 1),
    ApiFunction::new("nvim_command", 1),
    ApiFunction::deprecated("nvim_command_output", 1, 7, "nvim_exec"),
    ApiFunction::deprecated("nvim_execute_lua", 3, 7, "nvim_exec_lua"),
    ApiFunction::new("nvim_exec_lua", 7),
    ApiFunction::new("nvim_exec", 7),
    ApiFunction::new("nvim_eval", 1),
    ApiFunction::new("nvim_call_function", 1),
    ApiFunction::new("nvim_call_dict_function", 4),
    ApiFunction::new("nvim_feedkeys", 1),
    ApiFunction::new("nvim_input", 1),
    ApiFunction::new("nvim_replace_termcodes", 1),
    ApiFunction::new("nvim_strwidth", 1),
    ApiFunction::new("nvim_subscribe", 1),
    ApiFunction::new("nvim_unsubscribe", 1),
    ApiFunction::new("nvim_get_current_line", 1),
    ApiFunction::new("nvim_set_current_line", 1),
    ApiFunction::new("nvim_del_current_line", 1),
    ApiFunction::new("nvim_get_current_buf", 1),
    ApiFunction::new("nvim_set_current_buf", 1),
    ApiFunction::new("nvim_get_current_win", 1),
    ApiFunction::new("nvim_set_current_win", 1),
    ApiFunction::new("nvim_get_current_tabpage", 1),
    ApiFunction::new("nvim_set_current_tabpage", 1),
    ApiFunction::new("nvim_list_bufs", 1),
    ApiFunction::new("nvim_list_wins", 1),
    ApiFunction::new("nvim_list_tabpages", 1),
    ApiFunction::new("nvim_list_runtime_paths", 1),
    ApiFunction::new("nvim_set_current_dir", 1),
    ApiFunction::new("nvim_get_var", 1),
    ApiFunction::new("nvim_set_var", 1),
    ApiFunction::new("nvim_del_var", 1),
    ApiFunction::new("nvim_get_vvar", 1),
    ApiFunction::deprecated("nvim_get_option", 1, 11, "nvim_get_option_value"),
    ApiFunction::deprecated("nvim_set_option", 1, 11, "nvim_set_option_value"),
    ApiFunction::new("nvim_get_option_value", 9),
    ApiFunction::new("nvim_set_option_value", 9),
    ApiFunction::new("nvim_out_write", 1),
    ApiFunction::new("nvim_err_write", 1),
    ApiFunction::new("nvim_err_writeln", 1),
    ApiFunction::new("nvim_get_color_by_name", 1),
    ApiFunction::new("nvim_get_color_map", 1),
    ApiFunction::new("nvim_get_mode", 2),
    ApiFunction::new("nvim_get_keymap", 3),
    ApiFunction::new("nvim_get_hl_by_id", 3),
    ApiFunction::new("nvim_get_hl_by_name", 3),
    ApiFunction::new("nvim_get_commands", 4),
    ApiFunction::new("nvim_set_client_info", 4),
    ApiFunction::new("nvim_get_chan_info", 4),
    ApiFunction::new("nvim_list_chans", 4),
    ApiFunction::new("nvim_list_uis", 4),
    ApiFunction::new("nvim_get_proc", 4),
    ApiFunction::new("nvim_get_proc_children", 4),
    ApiFunction::new("nvim_parse_expression", 4),
];

/// Find a function by RPC name.
pub fn lookup(name: &str) -> Option<&'static ApiFunction> {
    FUNCTIONS.iter().find(|f| f.name == name)
}
