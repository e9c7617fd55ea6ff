//! Virtual UICC (C8): a pure C-APDU -> R-APDU dispatcher, grounded in
//! spec.md section 4.8. No I/O happens here -- the Card Simulator's drive
//! loop (`crate::client`) owns the transport and honors any injected delay
//! this dispatcher reports alongside a response.

pub mod gp;

use std::time::Duration;

use gp_ota_apdu::{CommandApdu, ResponseApdu, StatusWord};

/// One registered applet: a dedicated-file name returned in the SELECT FCI,
/// matched by AID.
#[derive(Clone, Debug)]
pub struct AppletEntry {
    pub aid: Vec<u8>,
    pub dedicated_file_name: Vec<u8>,
}

/// Profile injected at construction time: card identity plus the applet
/// directory SELECT can address.
#[derive(Clone, Debug)]
pub struct Profile {
    pub iccid: String,
    pub imsi: Option<String>,
    pub atr: Vec<u8>,
    pub applets: Vec<AppletEntry>,
}

impl Profile {
    /// The profile used by the E1 scenario (spec.md section 8): a single
    /// Issuer Security Domain whose SELECT response is the well-known
    /// `1PAY.SYS.DDF01` dedicated-file name.
    pub fn default_isd() -> Self {
        Self {
            iccid: "89000000000000000000".to_string(),
            imsi: None,
            atr: vec![0x3b, 0x9f, 0x96, 0x80, 0x1f, 0xc7, 0x80, 0x31, 0xa0, 0x73, 0xbe, 0x21, 0x13, 0x67, 0x43, 0x20, 0x07, 0x18, 0x00, 0x00, 0x01, 0xa5],
            applets: vec![AppletEntry {
                aid: hex_decode_test_aid(),
                dedicated_file_name: b"1PAY.SYS.DDF01".to_vec(),
            }],
        }
    }
}

fn hex_decode_test_aid() -> Vec<u8> {
    hex::decode("A000000151000000AABB00").expect("valid static hex")
}

/// A fault a [`FaultInjector`] wants applied to the next matching command:
/// an overriding status word, an injected delay before the response is
/// sent, or both.
#[derive(Clone, Debug, Default)]
pub struct InjectedFault {
    pub sw: Option<StatusWord>,
    pub delay: Option<Duration>,
}

/// Scripted-behavior capability the test harness implements to exercise
/// Admin Server failure paths (spec.md section 4.8).
pub trait FaultInjector: Send + Sync {
    fn before_dispatch(&self, command: &CommandApdu) -> Option<InjectedFault>;
}

/// A command paired with any delay the caller should honor before sending
/// the response -- kept separate from [`ResponseApdu`] so this dispatcher
/// stays I/O-free.
pub struct DispatchResult {
    pub response: ResponseApdu,
    pub delay: Option<Duration>,
}

pub struct VirtualUicc {
    profile: Profile,
    selected_aid: Option<Vec<u8>>,
    gp: gp::GpState,
    fault_injector: Option<Box<dyn FaultInjector>>,
}

impl VirtualUicc {
    pub fn new(profile: Profile, static_keys: gp_ota_core::scp02::StaticKeys) -> Self {
        Self { profile, selected_aid: None, gp: gp::GpState::new(static_keys), fault_injector: None }
    }

    pub fn with_fault_injector(mut self, injector: Box<dyn FaultInjector>) -> Self {
        self.fault_injector = Some(injector);
        self
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// AID of the applet most recently selected, if any.
    pub fn selected_aid(&self) -> Option<&[u8]> {
        self.selected_aid.as_deref()
    }

    /// Parses and dispatches one C-APDU. Never panics on malformed input --
    /// a decode failure yields SW `6700` per spec.md section 4.8 rule 1.
    pub fn execute(&mut self, raw: &[u8]) -> DispatchResult {
        let command = match CommandApdu::decode(raw) {
            Ok(c) => c,
            Err(_) => return DispatchResult { response: ResponseApdu::new(Vec::new(), StatusWord::WRONG_LENGTH), delay: None },
        };

        if let Some(fault) = self.fault_injector.as_ref().and_then(|f| f.before_dispatch(&command)) {
            if let Some(sw) = fault.sw {
                return DispatchResult { response: ResponseApdu::new(Vec::new(), sw), delay: fault.delay };
            }
            let response = self.dispatch(&command);
            return DispatchResult { response, delay: fault.delay };
        }

        DispatchResult { response: self.dispatch(&command), delay: None }
    }

    fn dispatch(&mut self, command: &CommandApdu) -> ResponseApdu {
        if command.ins == 0xa4 {
            return self.select(command);
        }

        if gp::GpState::is_secured_class(command.cla) {
            return self.dispatch_gp(command);
        }

        self.dispatch_applet(command)
    }

    fn dispatch_gp(&mut self, command: &CommandApdu) -> ResponseApdu {
        // Every GP command except INITIALIZE UPDATE/EXTERNAL AUTHENTICATE
        // themselves may arrive wrapped in secure messaging once the
        // channel is open.
        if command.cla & 0x04 != 0 {
            match self.gp.unwrap_secure(command) {
                Ok(unwrapped) => self.gp.handle(unwrapped.ins, &unwrapped),
                Err(sw) => ResponseApdu::new(Vec::new(), sw),
            }
        } else {
            self.gp.handle(command.ins, command)
        }
    }

    /// Built-in file-system/applet route for non-GP classes. This harness
    /// ships no built-in filesystem and no non-GP applet behaviors beyond
    /// SELECT, so every other INS here is simply unhandled.
    fn dispatch_applet(&mut self, _command: &CommandApdu) -> ResponseApdu {
        ResponseApdu::new(Vec::new(), StatusWord::INS_NOT_SUPPORTED)
    }

    fn select(&mut self, command: &CommandApdu) -> ResponseApdu {
        let aid = &command.data;
        match self.profile.applets.iter().find(|a| &a.aid == aid) {
            Some(entry) => {
                self.selected_aid = Some(entry.aid.clone());
                let fci = gp_ota_apdu::TlvNode::constructed(
                    vec![0x6f],
                    vec![gp_ota_apdu::TlvNode::primitive(vec![0x84], entry.dedicated_file_name.clone())],
                );
                ResponseApdu::ok(fci.encode())
            }
            None => ResponseApdu::new(Vec::new(), StatusWord::FILE_NOT_FOUND),
        }
    }
}
