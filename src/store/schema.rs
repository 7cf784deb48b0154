// Table definitions for the store. Column names follow the original
// system's table/column vocabulary (switchIP, stamp, etc.) since the
// query layer and operators already think in those terms.

use rusqlite::Connection;

use crate::error::Result;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS switch (
            switchIP TEXT PRIMARY KEY,
            switchMAC TEXT,
            switchDesc TEXT,
            switchStatus TEXT,
            stamp REAL
        );

        CREATE TABLE IF NOT EXISTS switchport (
            switchIP TEXT NOT NULL,
            portNum INTEGER NOT NULL,
            portDesc TEXT,
            portType TEXT NOT NULL,
            isRoot TEXT,
            PRIMARY KEY (switchIP, portNum)
        );

        CREATE TABLE IF NOT EXISTS macaddress (
            stamp REAL NOT NULL,
            switchIP TEXT NOT NULL,
            vlan INTEGER,
            mac TEXT NOT NULL,
            port INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_macaddress_mac ON macaddress(mac);
        CREATE INDEX IF NOT EXISTS idx_macaddress_switch ON macaddress(switchIP);

        CREATE TABLE IF NOT EXISTS arpentry (
            stamp REAL NOT NULL,
            ifName TEXT,
            vlan INTEGER DEFAULT 0,
            ipaddr TEXT NOT NULL,
            mac TEXT NOT NULL,
            PRIMARY KEY (ipaddr)
        );
        CREATE INDEX IF NOT EXISTS idx_arpentry_mac ON arpentry(mac);

        CREATE TABLE IF NOT EXISTS servicelabel (
            ipOrCidr TEXT PRIMARY KEY,
            label TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS accesspoint (
            mac TEXT PRIMARY KEY,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS siteparam (
            parametro TEXT PRIMARY KEY,
            valor TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS switchparent (
            switchHijo TEXT PRIMARY KEY,
            switchPadre TEXT NOT NULL,
            portPadre INTEGER NOT NULL,
            stamp REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS topology_snapshot (
            stamp REAL PRIMARY KEY,
            edges_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vendor (
            halfMac TEXT PRIMARY KEY,
            elVendor TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS joinstrategy (
            switchIP TEXT PRIMARY KEY,
            use_t2 INTEGER NOT NULL,
            use_t3 INTEGER NOT NULL,
            pred_t1_t2 TEXT,
            pred_t2_t3 TEXT,
            pred_t3_t4 TEXT,
            pred_t1_t3 TEXT,
            pred_t1_t4 TEXT,
            pred_t2_t4 TEXT,
            port_source TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS rawflow (
            stamp TEXT NOT NULL,
            srcIP TEXT NOT NULL,
            dstIP TEXT NOT NULL,
            srcPort INTEGER NOT NULL,
            dstPort INTEGER NOT NULL,
            protocol TEXT NOT NULL,
            packets INTEGER NOT NULL,
            bytes INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rawflow_stamp ON rawflow(stamp);

        CREATE TABLE IF NOT EXISTS publicus (
            stamp TEXT NOT NULL, srcIP TEXT NOT NULL, dstIP TEXT NOT NULL,
            srcPort INTEGER NOT NULL, dstPort INTEGER NOT NULL,
            protocol TEXT NOT NULL, packets INTEGER NOT NULL, bytes INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS privateus (
            stamp TEXT NOT NULL, srcIP TEXT NOT NULL, dstIP TEXT NOT NULL,
            srcPort INTEGER NOT NULL, dstPort INTEGER NOT NULL,
            protocol TEXT NOT NULL, packets INTEGER NOT NULL, bytes INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS publicds (
            stamp TEXT NOT NULL, srcIP TEXT NOT NULL, dstIP TEXT NOT NULL,
            srcPort INTEGER NOT NULL, dstPort INTEGER NOT NULL,
            protocol TEXT NOT NULL, packets INTEGER NOT NULL, bytes INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS privateds (
            stamp TEXT NOT NULL, srcIP TEXT NOT NULL, dstIP TEXT NOT NULL,
            srcPort INTEGER NOT NULL, dstPort INTEGER NOT NULL,
            protocol TEXT NOT NULL, packets INTEGER NOT NULL, bytes INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_publicus_stamp ON publicus(stamp);
        CREATE INDEX IF NOT EXISTS idx_privateus_stamp ON privateus(stamp);
        CREATE INDEX IF NOT EXISTS idx_publicds_stamp ON publicds(stamp);
        CREATE INDEX IF NOT EXISTS idx_privateds_stamp ON privateds(stamp);

        CREATE TABLE IF NOT EXISTS hostname (
            ipaddr TEXT PRIMARY KEY,
            hostname TEXT NOT NULL,
            stamp REAL NOT NULL
        );

        INSERT OR IGNORE INTO servicelabel (ipOrCidr, label) VALUES
            ('8.8.8.8', 'Google DNS'),
            ('8.8.4.4', 'Google DNS'),
            ('1.1.1.1', 'Cloudflare DNS'),
            ('1.0.0.1', 'Cloudflare DNS'),
            ('10.0.0.0/8', 'Private network'),
            ('172.16.0.0/12', 'Private network'),
            ('192.168.0.0/16', 'Private network');
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='switch'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
