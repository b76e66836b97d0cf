//! Order-side lookups over the locally replicated order tables, and the
//! writes OMS events make to them.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use super::{parse_enum, parse_optional_date};
use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Order, OrderContext, OrderRecord, OrderStatus, OrderVisit, OrderedTest, PatientDetail, Pathologist,
};
use crate::domain::ports::OrderLookup;

/// [`OrderLookup`] over the `orders`, `order_visits` and `order_tests` tables.
#[derive(Clone)]
pub struct SqliteOrderLookup {
    pool: SqlitePool,
}

impl SqliteOrderLookup {
    /// Lookup over a migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    city_code: String,
    servicing_lab_id: i64,
    patient_id: String,
    status: String,
    dob: Option<String>,
    expected_dob: Option<String>,
    gender: Option<String>,
}

#[derive(sqlx::FromRow)]
struct OrderedTestRow {
    central_test_id: String,
    test_code: String,
    test_name: String,
    processing_lab_id: i64,
    processing_lab_inhouse: bool,
    barcodes: String,
}

async fn load_record(pool: &SqlitePool, order_id: &str) -> DomainResult<Option<OrderRecord>> {
    let row: Option<OrderRow> = sqlx::query_as(
        r#"SELECT o.order_id, o.city_code, o.servicing_lab_id, o.patient_id, o.status,
                  p.dob, p.expected_dob, p.gender
           FROM orders o
           LEFT JOIN patients p ON p.patient_id = o.patient_id
           WHERE o.order_id = ?"#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let visits: Vec<(String, i64)> =
        sqlx::query_as("SELECT visit_id, lab_id FROM order_visits WHERE order_id = ? ORDER BY visit_id")
            .bind(order_id)
            .fetch_all(pool)
            .await?;
    let tests: Vec<OrderedTestRow> = sqlx::query_as(
        r#"SELECT central_test_id, test_code, test_name, processing_lab_id, processing_lab_inhouse, barcodes
           FROM order_tests WHERE order_id = ? ORDER BY central_test_id"#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    let tests = tests
        .into_iter()
        .map(|t| {
            Ok(OrderedTest {
                central_test_id: t.central_test_id,
                test_code: t.test_code,
                test_name: t.test_name,
                processing_lab_id: t.processing_lab_id,
                processing_lab_inhouse: t.processing_lab_inhouse,
                barcodes: serde_json::from_str(&t.barcodes)?,
            })
        })
        .collect::<DomainResult<Vec<_>>>()?;

    Ok(Some(OrderRecord {
        patient: PatientDetail {
            patient_id: row.patient_id.clone(),
            dob: parse_optional_date(row.dob)?,
            expected_dob: parse_optional_date(row.expected_dob)?,
            gender: row.gender.unwrap_or_default(),
        },
        order: Order {
            order_id: row.order_id,
            city_code: row.city_code,
            servicing_lab_id: row.servicing_lab_id,
            patient_id: row.patient_id,
            status: parse_enum("order status", &row.status, OrderStatus::from_str)?,
        },
        visits: visits
            .into_iter()
            .map(|(visit_id, lab_id)| OrderVisit { visit_id, lab_id })
            .collect(),
        tests,
    }))
}

/// Replace the stored order-side state with `record`.
///
/// Visits are only ever added or moved: an LIS visit stays resolvable after
/// the OMS stops listing it.
pub(super) async fn write_order(conn: &mut SqliteConnection, record: &OrderRecord) -> DomainResult<()> {
    let patient = &record.patient;
    sqlx::query(
        r#"INSERT INTO patients (patient_id, dob, expected_dob, gender) VALUES (?, ?, ?, ?)
           ON CONFLICT(patient_id) DO UPDATE SET
               dob = excluded.dob, expected_dob = excluded.expected_dob, gender = excluded.gender"#,
    )
    .bind(&patient.patient_id)
    .bind(patient.dob.map(|d| d.to_string()))
    .bind(patient.expected_dob.map(|d| d.to_string()))
    .bind(&patient.gender)
    .execute(&mut *conn)
    .await?;

    let order = &record.order;
    sqlx::query(
        r#"INSERT INTO orders (order_id, city_code, servicing_lab_id, patient_id, status) VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(order_id) DO UPDATE SET
               city_code = excluded.city_code, servicing_lab_id = excluded.servicing_lab_id,
               patient_id = excluded.patient_id, status = excluded.status"#,
    )
    .bind(&order.order_id)
    .bind(&order.city_code)
    .bind(order.servicing_lab_id)
    .bind(&order.patient_id)
    .bind(order.status.as_str())
    .execute(&mut *conn)
    .await?;

    for visit in &record.visits {
        sqlx::query(
            r#"INSERT INTO order_visits (visit_id, order_id, lab_id) VALUES (?, ?, ?)
               ON CONFLICT(visit_id) DO UPDATE SET order_id = excluded.order_id, lab_id = excluded.lab_id"#,
        )
        .bind(&visit.visit_id)
        .bind(&order.order_id)
        .bind(visit.lab_id)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query("DELETE FROM order_tests WHERE order_id = ?")
        .bind(&order.order_id)
        .execute(&mut *conn)
        .await?;
    for test in &record.tests {
        sqlx::query(
            r#"INSERT INTO order_tests (central_test_id, order_id, test_code, test_name, processing_lab_id,
                   processing_lab_inhouse, barcodes)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(central_test_id) DO UPDATE SET
                   order_id = excluded.order_id, test_code = excluded.test_code, test_name = excluded.test_name,
                   processing_lab_id = excluded.processing_lab_id,
                   processing_lab_inhouse = excluded.processing_lab_inhouse, barcodes = excluded.barcodes"#,
        )
        .bind(&test.central_test_id)
        .bind(&order.order_id)
        .bind(&test.test_code)
        .bind(&test.test_name)
        .bind(test.processing_lab_id)
        .bind(test.processing_lab_inhouse)
        .bind(serde_json::to_string(&test.barcodes)?)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl OrderLookup for SqliteOrderLookup {
    async fn find_by_visit(&self, visit_id: &str) -> DomainResult<Option<OrderContext>> {
        let visit: Option<(String, i64)> =
            sqlx::query_as("SELECT order_id, lab_id FROM order_visits WHERE visit_id = ?")
                .bind(visit_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some((order_id, lab_id)) = visit else {
            return Ok(None);
        };
        Ok(load_record(&self.pool, &order_id)
            .await?
            .map(|record| record.context(visit_id, lab_id)))
    }

    async fn find_by_order(&self, order_id: &str) -> DomainResult<Option<OrderRecord>> {
        load_record(&self.pool, order_id).await
    }

    async fn pathologists(&self) -> DomainResult<Vec<Pathologist>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as("SELECT user_id, lis_user_id FROM pathologists")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(user_id, lis_user_id)| Pathologist { user_id, lis_user_id })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::NaiveDate;

    async fn seeded() -> SqliteOrderLookup {
        let pool = create_migrated_test_pool().await.unwrap();
        sqlx::raw_sql(
            r#"INSERT INTO patients (patient_id, dob, expected_dob, gender) VALUES ('P1', NULL, '1990-04-02', 'F');
               INSERT INTO orders (order_id, city_code, servicing_lab_id, patient_id, status)
                   VALUES ('O1', 'BLR', 1, 'P1', 'ordered');
               INSERT INTO order_visits (visit_id, order_id, lab_id) VALUES ('V1', 'O1', 1);
               INSERT INTO order_tests (central_test_id, order_id, test_code, test_name, processing_lab_id,
                   processing_lab_inhouse, barcodes)
                   VALUES ('CT-GLU', 'O1', 'GLU', 'Glucose', 1, 0, '["BC-1"]'),
                          ('CT-TSH', 'O1', 'TSH', 'TSH', 9, 1, '[]');
               INSERT INTO pathologists (user_id, lis_user_id) VALUES (70, 7);"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        SqliteOrderLookup::new(pool)
    }

    #[tokio::test]
    async fn test_find_by_visit_assembles_context() {
        let lookup = seeded().await;
        let context = lookup.find_by_visit("V1").await.unwrap().unwrap();

        assert_eq!(context.order.order_id, "O1");
        assert_eq!(context.order.status, OrderStatus::Ordered);
        assert_eq!(context.patient.effective_dob(), NaiveDate::from_ymd_opt(1990, 4, 2));
        assert_eq!(context.tests.len(), 2);
        assert_eq!(context.find_test("GLU").unwrap().barcodes, vec!["BC-1".to_string()]);
        assert!(context.find_test("TSH").unwrap().processing_lab_inhouse);
    }

    #[tokio::test]
    async fn test_write_order_replaces_tests_and_keeps_visits() {
        let lookup = seeded().await;
        let mut record = lookup.find_by_order("O1").await.unwrap().unwrap();
        assert_eq!(record.visits.len(), 1);
        record.remove_test("CT-TSH");
        record.tests[0].barcodes = vec!["BC-9".into()];
        record.order.status = OrderStatus::Cancelled;
        record.patient.gender = "M".into();
        record.visits = vec![OrderVisit {
            visit_id: "V2".into(),
            lab_id: 4,
        }];

        let mut conn = lookup.pool.acquire().await.unwrap();
        write_order(&mut conn, &record).await.unwrap();
        drop(conn);

        let stored = lookup.find_by_order("O1").await.unwrap().unwrap();
        assert_eq!(stored.order.status, OrderStatus::Cancelled);
        assert_eq!(stored.patient.gender, "M");
        assert_eq!(stored.tests.len(), 1);
        assert_eq!(stored.tests[0].barcodes, vec!["BC-9".to_string()]);
        assert_eq!(stored.visits.len(), 2);
        let context = lookup.find_by_visit("V2").await.unwrap().unwrap();
        assert_eq!(context.lab_id, 4);
        assert!(lookup.find_by_visit("V1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_visit_is_none() {
        let lookup = seeded().await;
        assert!(lookup.find_by_visit("V404").await.unwrap().is_none());
        assert!(lookup.find_by_order("O404").await.unwrap().is_none());
        assert_eq!(
            lookup.pathologists().await.unwrap(),
            vec![Pathologist {
                user_id: 70,
                lis_user_id: 7
            }]
        );
    }
}
