//! Scan-result record and the Wi-Fi enums it's built from, grounded in
//! `main/include/badgevms/wifi.h`.

use bitflags::bitflags;

/// WPA/WPA2/WPA3 cipher suite, mirroring `wifi_cipher_type_t`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum CipherType {
    /// No cipher negotiated.
    None,
    /// WEP-40.
    Wep40,
    /// WEP-104.
    Wep104,
    /// TKIP.
    Tkip,
    /// CCMP (AES).
    Ccmp,
    /// TKIP and CCMP both offered.
    TkipCcmp,
    /// AES-128-CMAC (management frame protection).
    AesCmac128,
    /// SMS4.
    Sms4,
    /// GCMP.
    Gcmp,
    /// GCMP-256.
    Gcmp256,
    /// AES-GMAC-128.
    AesGmac128,
    /// AES-GMAC-256.
    AesGmac256,
    /// Unknown or unsupported cipher.
    Unknown,
}

/// Authentication mode, mirroring `wifi_auth_mode_t`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum AuthMode {
    /// Open network, no authentication.
    Open,
    /// WEP.
    Wep,
    /// WPA-PSK.
    WpaPsk,
    /// WPA2-PSK.
    Wpa2Psk,
    /// WPA/WPA2 mixed PSK.
    WpaWpa2Psk,
    /// 802.1X/EAP.
    Wpa2Enterprise,
    /// WPA3-PSK.
    Wpa3Psk,
    /// WPA2/WPA3 mixed PSK.
    Wpa2Wpa3Psk,
    /// WAPI-PSK.
    WapiPsk,
    /// Opportunistic Wireless Encryption.
    Owe,
    /// WPA3 Enterprise, 192-bit suite B.
    Wpa3Enterprise192Bit,
    /// WPA2 Enterprise with WPA3 transition.
    Wpa2Wpa3Enterprise,
    /// WPA3 Enterprise.
    Wpa3Enterprise,
    /// DPP (Device Provisioning Protocol).
    Dpp,
    /// WPA-Enterprise.
    WpaEnterprise,
    /// Unknown or unsupported mode.
    Unknown,
}

bitflags! {
    /// PHY modes a station supports, mirroring `wifi_connection_mode_t`.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct ConnectionMode: u32 {
        /// No PHY mode bits set.
        const NONE = 0;
        /// 802.11b.
        const MODE_11B = 0b000_0001;
        /// 802.11g.
        const MODE_11G = 0b000_0010;
        /// 802.11n.
        const MODE_11N = 0b000_0100;
        /// Long-range mode.
        const LR = 0b000_1000;
        /// 802.11a.
        const MODE_11A = 0b001_0000;
        /// 802.11ac.
        const MODE_11AC = 0b010_0000;
        /// 802.11ax.
        const MODE_11AX = 0b100_0000;
    }
}

/// One scan-result record.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WifiStation {
    bssid: [u8; 6],
    ssid: String,
    primary_channel: u8,
    secondary_channel: u8,
    rssi: i8,
    auth_mode: AuthMode,
    pairwise_cipher: CipherType,
    group_cipher: CipherType,
    phy_mode: ConnectionMode,
    wps: bool,
}

impl WifiStation {
    /// Builds a scan-result record.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bssid: [u8; 6],
        ssid: impl Into<String>,
        primary_channel: u8,
        secondary_channel: u8,
        rssi: i8,
        auth_mode: AuthMode,
        pairwise_cipher: CipherType,
        group_cipher: CipherType,
        phy_mode: ConnectionMode,
        wps: bool,
    ) -> Self {
        Self {
            bssid,
            ssid: ssid.into(),
            primary_channel,
            secondary_channel,
            rssi,
            auth_mode,
            pairwise_cipher,
            group_cipher,
            phy_mode,
            wps,
        }
    }

    /// Access point MAC address.
    pub fn bssid(&self) -> [u8; 6] {
        self.bssid
    }

    /// Network name.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Primary channel number.
    pub fn primary_channel(&self) -> u8 {
        self.primary_channel
    }

    /// Secondary channel number, if the network is bonded.
    pub fn secondary_channel(&self) -> u8 {
        self.secondary_channel
    }

    /// Received signal strength, in dBm.
    pub fn rssi(&self) -> i8 {
        self.rssi
    }

    /// Negotiated authentication mode.
    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// Unicast cipher.
    pub fn pairwise_cipher(&self) -> CipherType {
        self.pairwise_cipher
    }

    /// Multicast/broadcast cipher.
    pub fn group_cipher(&self) -> CipherType {
        self.group_cipher
    }

    /// PHY mode bitmask derived from the beacon's supported-rates IEs.
    pub fn phy_mode(&self) -> ConnectionMode {
        self.phy_mode
    }

    /// True if the access point advertises WPS.
    pub fn wps(&self) -> bool {
        self.wps
    }

    #[cfg(test)]
    pub(crate) fn test_station(ssid: &str) -> Self {
        Self::new(
            [0, 1, 2, 3, 4, 5],
            ssid,
            6,
            0,
            -42,
            AuthMode::Wpa2Psk,
            CipherType::Ccmp,
            CipherType::Ccmp,
            ConnectionMode::MODE_11N,
            false,
        )
    }
}
