//! Host functions exposed to guest code.
//!
//! Each capability is installed as a plain global. Arguments and results are
//! copied through [`crate::marshal`]; host failures reach the guest as an
//! `Error` named `CapabilityError` carrying a single sanitized line.

mod encoding;
mod http;
mod logger;
mod timer;

use std::{cell::RefCell, fmt, sync::Arc, time::Duration};

use rquickjs::{Ctx, Exception, JsLifetime, Object, runtime::UserDataError};

use crate::{host::Host, id::RunId};

const CAPABILITY_ERROR_NAME: &str = "CapabilityError";
const MAX_ERROR_MESSAGE_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    HttpGet,
    HttpPost,
    Base64Encode,
    Sleep,
    Logger,
}

impl Capability {
    pub const ALL: [Self; 5] = [
        Self::HttpGet,
        Self::HttpPost,
        Self::Base64Encode,
        Self::Sleep,
        Self::Logger,
    ];

    /// Name of the guest global the capability is installed under.
    #[must_use]
    pub const fn global_name(self) -> &'static str {
        match self {
            Self::HttpGet => "httpGet",
            Self::HttpPost => "httpPost",
            Self::Base64Encode => "base64Encode",
            Self::Sleep => "sleep",
            Self::Logger => "logger",
        }
    }

    #[must_use]
    pub fn from_global_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.global_name() == name)
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.global_name())
    }
}

/// Which capabilities a run receives. Anything not in the set is simply
/// absent from the guest's global object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    #[must_use]
    pub const fn all() -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < Capability::ALL.len() {
            bits |= Capability::ALL[i].bit();
            i += 1;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    #[must_use]
    pub const fn without(self, capability: Capability) -> Self {
        Self(self.0 & !capability.bit())
    }

    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        iter.into_iter().fold(Self::none(), Self::with)
    }
}

/// Per-run state shared by the installed capabilities.
pub(crate) struct Bridge<H> {
    pub host: Arc<H>,
    pub run_id: RunId,
    pub http_timeout: Option<Duration>,
}

/// Every `CapabilityError` object the host has thrown into a runtime, with
/// the message it was created with.
#[derive(Default)]
struct ThrownErrors<'js>(RefCell<Vec<(Object<'js>, String)>>);

unsafe impl<'js> JsLifetime<'js> for ThrownErrors<'js> {
    type Changed<'to> = ThrownErrors<'to>;
}

pub(crate) fn install<H: Host>(
    ctx: &Ctx<'_>,
    capabilities: CapabilitySet,
    bridge: &Bridge<H>,
) -> rquickjs::Result<()> {
    ctx.store_userdata(ThrownErrors::default())
        .map_err(|_| rquickjs::Error::UserData(UserDataError(())))?;
    let globals = ctx.globals();
    for capability in capabilities.iter() {
        let name = capability.global_name();
        match capability {
            Capability::HttpGet => globals.set(name, http::http_get(ctx, bridge)?)?,
            Capability::HttpPost => globals.set(name, http::http_post(ctx, bridge)?)?,
            Capability::Base64Encode => globals.set(name, encoding::base64_encode(ctx)?)?,
            Capability::Sleep => globals.set(name, timer::sleep(ctx)?)?,
            Capability::Logger => globals.set(name, logger::logger(ctx, bridge)?)?,
        }
    }
    Ok(())
}

/// Throw a `CapabilityError` into the guest.
pub(crate) fn capability_error(ctx: &Ctx<'_>, message: &str) -> rquickjs::Error {
    let message = sanitize_message(message);
    let exception = match Exception::from_message(ctx.clone(), &message) {
        Ok(exception) => exception,
        Err(e) => return e,
    };
    if let Err(e) = exception.as_object().set("name", CAPABILITY_ERROR_NAME) {
        return e;
    }
    if let Some(thrown) = ctx.userdata::<ThrownErrors>() {
        thrown
            .0
            .borrow_mut()
            .push((exception.as_object().clone(), message));
    }
    ctx.throw(exception.into_value())
}

/// The host-side message of `thrown` if it is one of the objects
/// [`capability_error`] threw. Guest objects that merely copy the name or
/// message never match.
pub(crate) fn thrown_by_host<'js>(ctx: &Ctx<'js>, thrown: &Object<'js>) -> Option<String> {
    let registry = ctx.userdata::<ThrownErrors>()?;
    let errors = registry.0.borrow();
    errors
        .iter()
        .find(|(object, _)| object.as_value() == thrown.as_value())
        .map(|(_, message)| message.clone())
}

/// First line only, bounded length.
pub(crate) fn sanitize_message(message: &str) -> String {
    let line = message.lines().next().unwrap_or_default().trim();
    if line.len() <= MAX_ERROR_MESSAGE_LEN {
        return line.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}
