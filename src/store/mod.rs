// The shared on-disk store. A single SQLite database opened in
// write-ahead-log mode: readers never block writers, and each worker
// opens its own connection against the same file rather than sharing a
// single connection handle across threads.

use std::net::Ipv4Addr;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::flows::is_local_network;
use crate::strategy::JoinStrategy;

pub mod schema;

pub use schema::init_schema;

/// One connection to the store, owned by a single worker.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    // ---- Switch / SwitchPort / MacAddress (poller writes) ----

    /// Atomically replaces all port/mac rows for one switch and records
    /// its status, within a single transaction. `ports` carries the
    /// final classification (ACCESS/TRUNK, ROOT flag) already applied.
    pub fn replace_switch_cycle(
        &mut self,
        switch_ip: &str,
        switch_mac: Option<&str>,
        switch_desc: &str,
        stamp: f64,
        online: bool,
        mac_count: usize,
        ports: &[PortRow],
        macs: &[MacRow],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        let status = if online {
            format!("ONLINE({mac_count})")
        } else {
            "OFFLINE".to_string()
        };
        tx.execute(
            "INSERT INTO switch (switchIP, switchMAC, switchDesc, switchStatus, stamp)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(switchIP) DO UPDATE SET
                switchMAC = excluded.switchMAC,
                switchDesc = excluded.switchDesc,
                switchStatus = excluded.switchStatus,
                stamp = excluded.stamp",
            params![switch_ip, switch_mac, switch_desc, status, stamp],
        )?;

        if online {
            tx.execute("DELETE FROM macaddress WHERE switchIP = ?1", params![switch_ip])?;
            tx.execute("DELETE FROM switchport WHERE switchIP = ?1", params![switch_ip])?;

            for p in ports {
                tx.execute(
                    "INSERT INTO switchport (switchIP, portNum, portDesc, portType, isRoot)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![switch_ip, p.port_num, p.port_desc, p.port_type, p.is_root],
                )?;
            }
            for m in macs {
                tx.execute(
                    "INSERT INTO macaddress (stamp, switchIP, vlan, mac, port)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![stamp, switch_ip, m.vlan, m.mac, m.port],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn all_switch_ips(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT switchIP FROM switch ORDER BY switchIP")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn online_switch_ips(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT switchIP FROM switch WHERE switchStatus LIKE 'ONLINE%' ORDER BY switchIP")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_online_switches(&self) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM switch WHERE switchStatus LIKE 'ONLINE%'",
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn switch_mac(&self, switch_ip: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT switchMAC FROM switch WHERE switchIP = ?1",
                params![switch_ip],
                |r| r.get(0),
            )
            .optional()?)
    }

    /// Trunk ports for a switch, excluding the ROOT port, with the set of
    /// management MACs observed on each — used by topology inference.
    pub fn trunk_ports_with_macs(&self, switch_ip: &str) -> Result<Vec<(i64, Vec<String>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT sp.portNum, m.mac FROM switchport sp
             JOIN macaddress m ON m.switchIP = sp.switchIP AND m.port = sp.portNum
             WHERE sp.switchIP = ?1 AND sp.portType = 'TRUNK' AND (sp.isRoot IS NULL OR sp.isRoot = '')
             ORDER BY sp.portNum",
        )?;
        let mut grouped: std::collections::BTreeMap<i64, Vec<String>> = Default::default();
        let rows = stmt.query_map(params![switch_ip], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (port, mac) = row?;
            grouped.entry(port).or_default().push(mac);
        }
        Ok(grouped.into_iter().collect())
    }

    // ---- JoinStrategy cache ----

    pub fn load_strategy(&self, switch_ip: &str) -> Result<Option<JoinStrategy>> {
        self.conn
            .query_row(
                "SELECT use_t2, use_t3, pred_t1_t2, pred_t2_t3, pred_t3_t4, pred_t1_t3, pred_t1_t4, pred_t2_t4, port_source
                 FROM joinstrategy WHERE switchIP = ?1",
                params![switch_ip],
                |r| {
                    Ok(JoinStrategy {
                        use_t2: r.get(0)?,
                        use_t3: r.get(1)?,
                        pred_t1_t2: r.get(2)?,
                        pred_t2_t3: r.get(3)?,
                        pred_t3_t4: r.get(4)?,
                        pred_t1_t3: r.get(5)?,
                        pred_t1_t4: r.get(6)?,
                        pred_t2_t4: r.get(7)?,
                        port_source: r.get(8)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn save_strategy(&mut self, switch_ip: &str, s: &JoinStrategy) -> Result<()> {
        self.conn.execute(
            "INSERT INTO joinstrategy
                (switchIP, use_t2, use_t3, pred_t1_t2, pred_t2_t3, pred_t3_t4, pred_t1_t3, pred_t1_t4, pred_t2_t4, port_source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(switchIP) DO UPDATE SET
                use_t2 = excluded.use_t2, use_t3 = excluded.use_t3,
                pred_t1_t2 = excluded.pred_t1_t2, pred_t2_t3 = excluded.pred_t2_t3,
                pred_t3_t4 = excluded.pred_t3_t4, pred_t1_t3 = excluded.pred_t1_t3,
                pred_t1_t4 = excluded.pred_t1_t4, pred_t2_t4 = excluded.pred_t2_t4,
                port_source = excluded.port_source",
            params![
                switch_ip, s.use_t2, s.use_t3, s.pred_t1_t2, s.pred_t2_t3, s.pred_t3_t4,
                s.pred_t1_t3, s.pred_t1_t4, s.pred_t2_t4, s.port_source
            ],
        )?;
        Ok(())
    }

    pub fn invalidate_strategy(&mut self, switch_ip: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM joinstrategy WHERE switchIP = ?1", params![switch_ip])?;
        Ok(())
    }

    // ---- SwitchParent (topology) ----

    pub fn replace_topology(&mut self, edges: &[(String, String, i64)], stamp: f64) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM switchparent", [])?;
        for (child, parent, parent_port) in edges {
            tx.execute(
                "INSERT INTO switchparent (switchHijo, switchPadre, portPadre, stamp) VALUES (?1, ?2, ?3, ?4)",
                params![child, parent, parent_port, stamp],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn append_topology_snapshot(&mut self, edges: &[(String, String, i64)], stamp: f64) -> Result<()> {
        let serialized = serde_json::to_string(edges).unwrap_or_default();
        self.conn.execute(
            "INSERT INTO topology_snapshot (stamp, edges_json) VALUES (?1, ?2)",
            params![stamp, serialized],
        )?;
        Ok(())
    }

    pub fn parent_of(&self, switch_ip: &str) -> Result<Option<(String, i64)>> {
        self.conn
            .query_row(
                "SELECT switchPadre, portPadre FROM switchparent WHERE switchHijo = ?1",
                params![switch_ip],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(Into::into)
    }

    // ---- SiteParam ----

    pub fn set_param(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO siteparam (parametro, valor) VALUES (?1, ?2)
             ON CONFLICT(parametro) DO UPDATE SET valor = excluded.valor",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_param(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT valor FROM siteparam WHERE parametro = ?1", params![key], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    // ---- Raw / curated flows ----

    pub fn max_curated_stamp(&self) -> Result<f64> {
        let tables = ["publicus", "privateus", "publicds", "privateds"];
        let mut max_stamp = 0.0f64;
        for t in tables {
            let stamp: Option<f64> =
                self.conn
                    .query_row(&format!("SELECT MAX(CAST(stamp AS REAL)) FROM {t}"), [], |r| r.get(0))?;
            if let Some(s) = stamp {
                if s > max_stamp {
                    max_stamp = s;
                }
            }
        }
        Ok(max_stamp)
    }

    pub fn raw_flows_since(&self, after_stamp: f64) -> Result<Vec<FlowRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT stamp, srcIP, dstIP, srcPort, dstPort, protocol, packets, bytes
             FROM rawflow WHERE CAST(stamp AS REAL) > ?1",
        )?;
        let rows = stmt.query_map(params![after_stamp], FlowRow::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_raw_flow(&mut self, row: &FlowRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rawflow (stamp, srcIP, dstIP, srcPort, dstPort, protocol, packets, bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![row.stamp, row.src_ip, row.dst_ip, row.src_port, row.dst_port, row.protocol, row.packets, row.bytes],
        )?;
        Ok(())
    }

    /// Inserts classified rows into their four destination tables and
    /// prunes rows older than `now - retention`, all in one transaction.
    pub fn curate_tick(
        &mut self,
        classified: &CurrentClassification,
        now: f64,
        retention_secs: f64,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        let cutoff = now - retention_secs;

        for (table, rows) in [
            ("publicus", &classified.public_us),
            ("privateus", &classified.private_us),
            ("publicds", &classified.public_ds),
            ("privateds", &classified.private_ds),
        ] {
            tx.execute(&format!("DELETE FROM {table} WHERE CAST(stamp AS REAL) < ?1"), params![cutoff])?;
            for row in rows {
                tx.execute(
                    &format!(
                        "INSERT INTO {table} (stamp, srcIP, dstIP, srcPort, dstPort, protocol, packets, bytes)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    params![row.stamp, row.src_ip, row.dst_ip, row.src_port, row.dst_port, row.protocol, row.packets, row.bytes],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn incremental_vacuum(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA incremental_vacuum;")?;
        Ok(())
    }

    pub fn curated_flows_since(&self, table: &str, since_stamp: f64) -> Result<Vec<FlowRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT stamp, srcIP, dstIP, srcPort, dstPort, protocol, packets, bytes
                 FROM {table} WHERE CAST(stamp AS REAL) >= ?1"
            ))?;
        let rows = stmt.query_map(params![since_stamp], FlowRow::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---- Hostname ----

    pub fn upsert_hostname(&mut self, ip: &str, hostname: &str, stamp: f64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO hostname (ipaddr, hostname, stamp) VALUES (?1, ?2, ?3)
             ON CONFLICT(ipaddr) DO UPDATE SET hostname = excluded.hostname, stamp = excluded.stamp",
            params![ip, hostname, stamp],
        )?;
        Ok(())
    }

    pub fn hostname_for(&self, ip: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT hostname FROM hostname WHERE ipaddr = ?1", params![ip], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    // ---- Vendor ----

    pub fn vendor_for_mac(&self, canonical_mac: &str) -> Result<Option<String>> {
        let half_mac = canonical_mac.split('-').take(3).collect::<Vec<_>>().join("-");
        self.conn
            .query_row(
                "SELECT elVendor FROM vendor WHERE ?1 LIKE halfMac || '%'",
                params![half_mac],
                |r| r.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    // ---- ArpEntry ----

    /// Fully replaces the ARP table with a fresh walk: entries are
    /// `(ifName, ipaddr, mac)`. The table is a snapshot, not a history,
    /// so a delete-all-then-insert each cycle matches its "current state
    /// only" role.
    pub fn replace_arp_table(&mut self, entries: &[(String, String, String)], stamp: f64) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM arpentry", [])?;
        for (if_name, ip, mac) in entries {
            tx.execute(
                "INSERT INTO arpentry (stamp, ifName, vlan, ipaddr, mac) VALUES (?1, ?2, 0, ?3, ?4)
                 ON CONFLICT(ipaddr) DO UPDATE SET stamp = excluded.stamp, ifName = excluded.ifName, mac = excluded.mac",
                params![stamp, if_name, ip, mac],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn arp_mac_for_ip(&self, ip: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT mac FROM arpentry WHERE ipaddr = ?1", params![ip], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn arp_ip_for_mac(&self, mac: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT ipaddr FROM arpentry WHERE mac = ?1", params![mac], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    /// Every switch's own management MAC, as resolved from the ARP
    /// harvest and recorded on its `switch` row — used by port
    /// classification to recognize inter-switch trunk links.
    pub fn all_switch_macs(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT switchMAC FROM switch WHERE switchMAC IS NOT NULL")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---- AccessPoint ----

    pub fn access_point_name(&self, mac: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT name FROM accesspoint WHERE mac = ?1", params![mac], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    // ---- ServiceLabel ----

    /// Exact-IP match first, then a linear scan of the CIDR entries.
    /// Callers that repeat this lookup across many rows should keep
    /// their own bounded cache in front of it.
    pub fn service_label(&self, ip: &str) -> Result<Option<String>> {
        if let Some(label) = self
            .conn
            .query_row("SELECT label FROM servicelabel WHERE ipOrCidr = ?1", params![ip], |r| r.get(0))
            .optional()?
        {
            return Ok(Some(label));
        }

        let Ok(addr) = ip.parse::<Ipv4Addr>() else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT ipOrCidr, label FROM servicelabel WHERE ipOrCidr LIKE '%/%'")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?;
        for row in rows {
            let (cidr, label) = row?;
            let Some((net, bits)) = cidr.split_once('/') else { continue };
            let (Ok(net_addr), Ok(bits)) = (net.parse::<Ipv4Addr>(), bits.parse::<u8>()) else { continue };
            if is_local_network(addr, net_addr, bits) {
                return Ok(Some(label));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct PortRow {
    pub port_num: i64,
    pub port_desc: String,
    pub port_type: String,
    pub is_root: String,
}

#[derive(Debug, Clone)]
pub struct MacRow {
    pub vlan: i64,
    pub mac: String,
    pub port: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FlowRow {
    pub stamp: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: i64,
    pub dst_port: i64,
    pub protocol: String,
    pub packets: i64,
    pub bytes: i64,
}

impl FlowRow {
    fn from_row(r: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(FlowRow {
            stamp: r.get(0)?,
            src_ip: r.get(1)?,
            dst_ip: r.get(2)?,
            src_port: r.get(3)?,
            dst_port: r.get(4)?,
            protocol: r.get(5)?,
            packets: r.get(6)?,
            bytes: r.get(7)?,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct CurrentClassification {
    pub public_us: Vec<FlowRow>,
    pub private_us: Vec<FlowRow>,
    pub public_ds: Vec<FlowRow>,
    pub private_ds: Vec<FlowRow>,
}
