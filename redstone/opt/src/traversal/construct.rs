use itertools::Itertools;
use linked_hash_map::LinkedHashMap;
use redstone_ir as ir;
use redstone_utils::RedstoneResult;

/// The value of a pass option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseVal {
    Bool(bool),
    Str(String),
}

impl ParseVal {
    pub fn bool(&self) -> bool {
        let ParseVal::Bool(b) = self else {
            panic!("Expected bool, got {self}");
        };
        *b
    }

    pub fn string(&self) -> &str {
        let ParseVal::Str(s) = self else {
            panic!("Expected string, got {self}");
        };
        s
    }
}

impl std::fmt::Display for ParseVal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseVal::Bool(b) => write!(f, "{b}"),
            ParseVal::Str(s) => write!(f, "{s}"),
        }
    }
}

/// An option accepted by a pass, set with `-x pass:opt=val`.
pub struct PassOpt {
    name: &'static str,
    description: &'static str,
    default: ParseVal,
    parse: fn(&str) -> Option<ParseVal>,
}

impl PassOpt {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        default: ParseVal,
        parse: fn(&str) -> Option<ParseVal>,
    ) -> Self {
        Self {
            name,
            description,
            default,
            parse,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn description(&self) -> &'static str {
        self.description
    }

    pub const fn default(&self) -> &ParseVal {
        &self.default
    }

    pub fn parse_bool(s: &str) -> Option<ParseVal> {
        s.parse::<bool>().ok().map(ParseVal::Bool)
    }

    /// Any non-empty string.
    pub fn parse_str(s: &str) -> Option<ParseVal> {
        (!s.is_empty()).then(|| ParseVal::Str(s.to_string()))
    }
}

/// Named things. [`do_pass_default`](super::Visitor::do_pass_default)
/// requires this so that a pass can be identified without an instance.
pub trait Named {
    /// The name of a pass. Prefixes its options.
    fn name() -> &'static str;
    /// A short description of the pass.
    fn description() -> &'static str;
    /// Options that can be passed to the pass.
    fn opts() -> Vec<PassOpt> {
        vec![]
    }
}

/// Construct a pass from an [ir::Context].
pub trait ConstructVisitor {
    /// Options of this pass, read from the context's `extra_opts`.
    fn get_opts(ctx: &ir::Context) -> LinkedHashMap<&'static str, ParseVal>
    where
        Self: Named,
    {
        Self::parse_opts(&ctx.extra_opts)
    }

    /// Pick this pass's settings out of `extra_opts`. `pass:opt` sets a flag
    /// and `pass:opt=val` sets a value. Options left unset take their
    /// defaults; unknown or unparsable settings are ignored with a warning.
    fn parse_opts(extra_opts: &[String]) -> LinkedHashMap<&'static str, ParseVal>
    where
        Self: Named,
    {
        let pass = Self::name();
        let opts = Self::opts();
        let mut values = LinkedHashMap::new();
        for extra in extra_opts {
            let Some(setting) = extra
                .strip_prefix(pass)
                .and_then(|rest| rest.strip_prefix(':'))
            else {
                continue;
            };
            let (key, val) = match setting.split_once('=') {
                Some((key, val)) => (key, Some(val)),
                None => (setting, None),
            };
            let Some(opt) = opts.iter().find(|o| o.name == key) else {
                log::warn!("Ignoring unknown option for pass `{pass}': {key}");
                continue;
            };
            match val.map_or(Some(ParseVal::Bool(true)), |v| (opt.parse)(v)) {
                Some(v) => {
                    values.insert(opt.name, v);
                }
                None => log::warn!(
                    "Ignoring invalid value for option `{pass}:{key}': {}",
                    val.unwrap_or_default()
                ),
            }
        }

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Extra options for {pass}: {}",
                values.iter().map(|(o, v)| format!("{o}->{v}")).join(", ")
            );
        }

        for opt in opts {
            if !values.contains_key(opt.name) {
                values.insert(opt.name, opt.default);
            }
        }
        values
    }

    /// Construct the pass using information from the Context
    fn from(ctx: &ir::Context) -> RedstoneResult<Self>
    where
        Self: Sized;

    /// Clear the data stored in the pass. Called before visiting the next
    /// function.
    fn clear_data(&mut self);
}
