//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const RECORD_SIZE: usize = 384;

pub const SERVICES: &str = "\
# Network services, Internet style
echo\t\t7/tcp
echo\t\t7/udp
ssh\t\t22/tcp
smtp\t\t25/tcp\t\tmail
smtp\t\t25/udp\t\tmail
";

pub const ACCEPT_INCOMING: &str = "\
# Generic accept
$IPTABLES -A $CHAIN $DEV -p $PROTO --dport $PORT $ADDRESS -j ACCEPT
";

pub const ACCEPT_OUTGOING: &str = "\
$IPTABLES -A $CHAIN $DEV -p $PROTO --dport $PORT $ADDRESS -j ACCEPT
";

pub const REJECT_INCOMING: &str = "\
$IPTABLES -A $CHAIN -p $PROTO --dport $PORT $SRC -j REJECT
$IPTABLES -A $CHAIN $SRC -j REJECT
";

/// A hand-written template from before substitution tokens existed.
pub const LEGACY_INCOMING: &str = "\
#
# Allow incoming web traffic
#
/sbin/iptables -A INPUT -p tcp --dport 80 -j ACCEPT
/sbin/ip6tables -A INPUT -p tcp --dport 80 -j ACCEPT
";

/// One login record in the glibc x86-64 layout.
pub struct Login<'a> {
    pub kind: i16,
    pub pid: i32,
    pub line: &'a str,
    pub id: &'a str,
    pub user: &'a str,
    pub host: &'a str,
    pub sec: i32,
    pub usec: i32,
    /// Address words in host order; written in network order.
    pub addr: [u32; 4],
}

impl Login<'_> {
    pub fn encode(&self) -> Vec<u8> {
        let mut raw = vec![0u8; RECORD_SIZE];
        raw[0..2].copy_from_slice(&self.kind.to_le_bytes());
        raw[4..8].copy_from_slice(&self.pid.to_le_bytes());
        put_str(&mut raw, 8, self.line);
        put_str(&mut raw, 40, self.id);
        put_str(&mut raw, 44, self.user);
        put_str(&mut raw, 76, self.host);
        raw[340..344].copy_from_slice(&self.sec.to_le_bytes());
        raw[344..348].copy_from_slice(&self.usec.to_le_bytes());
        for (i, word) in self.addr.iter().enumerate() {
            let at = 348 + i * 4;
            raw[at..at + 4].copy_from_slice(&word.to_be_bytes());
        }
        raw
    }
}

fn put_str(raw: &mut [u8], offset: usize, value: &str) {
    raw[offset..offset + value.len()].copy_from_slice(value.as_bytes());
}

/// The three logins of the reference wtmp file.
pub fn wtmp_logins() -> Vec<Login<'static>> {
    vec![
        Login {
            kind: 7,
            pid: 1001,
            line: "pts/10",
            id: "/10",
            user: "alice",
            host: "office.my-brilliant-site.com",
            sec: 1278054000,
            usec: 135790,
            addr: [0x0102_0304, 0, 0, 0],
        },
        Login {
            kind: 7,
            pid: 2001,
            line: "pts/11",
            id: "/11",
            user: "bob",
            host: "shop.my-brilliant-site.com",
            sec: 1278055800,
            usec: 654321,
            addr: [0x2001_0ba8, 0xdead_beef, 0xcafe_0000, 0x0000_0001],
        },
        Login {
            kind: 7,
            pid: 3001,
            line: "pts/12",
            id: "/12",
            user: "charlie",
            host: "garage.my-brilliant-site.com",
            sec: 1278057600,
            usec: 24680,
            addr: [0, 0, 0x0000_ffff, 0xc000_0280],
        },
    ]
}

pub fn write_wtmp(path: &Path) {
    let data: Vec<u8> = wtmp_logins().iter().flat_map(|l| l.encode()).collect();
    fs::write(path, data).unwrap();
}

/// Template directory, services file and firewall base in one temp dir.
pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let ws = Self {
            root: TempDir::new().unwrap(),
        };
        fs::create_dir_all(ws.templates()).unwrap();
        fs::create_dir_all(ws.base()).unwrap();
        ws.template("accept.incoming", ACCEPT_INCOMING);
        ws.template("accept.outgoing", ACCEPT_OUTGOING);
        ws.template("reject.incoming", REJECT_INCOMING);
        fs::write(ws.services(), SERVICES).unwrap();
        ws
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn templates(&self) -> PathBuf {
        self.path().join("rule.d")
    }

    pub fn base(&self) -> PathBuf {
        self.path().join("firewall")
    }

    pub fn services(&self) -> PathBuf {
        self.path().join("services")
    }

    pub fn template(&self, name: &str, content: &str) {
        fs::write(self.templates().join(name), content).unwrap();
    }

    /// Write a config pointing at this workspace and return its path.
    pub fn config(&self) -> PathBuf {
        let path = self.path().join("config.yaml");
        let yaml = format!(
            "template_dirs:\n  - {}\nservices_file: {}\nbase_dir: {}\npatterns_dir: {}\nwtmp_file: {}\n",
            self.templates().display(),
            self.services().display(),
            self.base().display(),
            self.path().join("patterns.d").display(),
            self.path().join("wtmp").display(),
        );
        fs::write(&path, yaml).unwrap();
        path
    }
}
