// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

macro_rules! peer_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_PEER,
            "peer_name" => $self.config.name.as_str(),
            "peer_addr" => $self.config.address.to_string(),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_PEER,
            "peer_name" => $self.config.name.as_str(),
            "peer_addr" => $self.config.address.to_string(),
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_PEER,
            "peer_name" => $self.config.name.as_str(),
            "peer_addr" => $self.config.address.to_string(),
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_PEER,
            "peer_name" => $self.config.name.as_str(),
            "peer_addr" => $self.config.address.to_string(),
        )
    };
}

macro_rules! server_log {
    ($self:expr, $level:ident, $msg:expr; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_SERVER,
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*; $($key:expr => $value:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_SERVER,
            $($key => $value),*
        )
    };
    ($self:expr, $level:ident, $msg:expr) => {
        slog::$level!($self.log,
            $msg;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_SERVER,
        )
    };
    ($self:expr, $level:ident, $msg:expr, $($args:expr),*) => {
        slog::$level!($self.log,
            $msg, $($args),*;
            "component" => crate::COMPONENT_BGP,
            "module" => crate::MOD_SERVER,
        )
    };
}

pub(crate) use {peer_log, server_log};
