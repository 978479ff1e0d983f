//! Explicit operator context.
//!
//! A [`Session`] holds up to two selected tables, each with the connector it
//! was loaded from. Engines are created from a [`TableContext`] on demand and
//! borrow it only for the duration of one call.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::core::schema::TableSchema;
use crate::core::traits::Connector;
use crate::engine::{
    JoinEngine, JoinSide, MetadataLoader, ReplaceEngine, SearchEngine, UnifyEngine, Validator,
};
use crate::error::{QualityError, Result};

/// Which of the two table slots an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    First,
    Second,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::First => f.write_str("first"),
            Slot::Second => f.write_str("second"),
        }
    }
}

/// A selected table and the connector it lives behind.
pub struct TableContext {
    pub connector: Arc<dyn Connector>,
    pub schema: TableSchema,
}

impl TableContext {
    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn search(&self) -> SearchEngine<'_> {
        SearchEngine::new(self.connector(), &self.schema)
    }

    pub fn replace(&self) -> ReplaceEngine<'_> {
        ReplaceEngine::new(self.connector(), &self.schema)
    }

    pub fn unify(&self) -> UnifyEngine<'_> {
        UnifyEngine::new(self.connector(), &self.schema)
    }

    pub fn validator(&self) -> Validator<'_> {
        Validator::new(self.connector(), &self.schema)
    }

    pub fn side(&self) -> JoinSide<'_> {
        JoinSide::new(self.connector(), &self.schema)
    }
}

#[derive(Default)]
pub struct Session {
    first: Option<TableContext>,
    second: Option<TableContext>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<TableContext> {
        match slot {
            Slot::First => &mut self.first,
            Slot::Second => &mut self.second,
        }
    }

    /// Load `table` through `connector` into `slot`, replacing what was there.
    pub async fn select_table(
        &mut self,
        slot: Slot,
        connector: Arc<dyn Connector>,
        table: &str,
    ) -> Result<&TableContext> {
        let schema = MetadataLoader::new(connector.as_ref()).load_table(table).await?;
        info!(
            "Selected {} as {} table on {}:{}",
            schema.name,
            slot,
            connector.target().host,
            connector.target().port
        );
        let context = self.slot_mut(slot).insert(TableContext { connector, schema });
        Ok(context)
    }

    /// Rebuild the schema of the table in `slot` after it may have changed.
    pub async fn refresh(&mut self, slot: Slot) -> Result<()> {
        let context = self.slot_mut(slot).as_mut().ok_or_else(|| not_selected(slot))?;
        context.schema = MetadataLoader::new(context.connector.as_ref())
            .load_table(&context.schema.name)
            .await?;
        Ok(())
    }

    pub fn table(&self, slot: Slot) -> Result<&TableContext> {
        match slot {
            Slot::First => self.first.as_ref(),
            Slot::Second => self.second.as_ref(),
        }
        .ok_or_else(|| not_selected(slot))
    }

    /// Both tables, for joins and comparisons.
    pub fn pair(&self) -> Result<(&TableContext, &TableContext)> {
        Ok((self.table(Slot::First)?, self.table(Slot::Second)?))
    }

    pub fn join_engine(&self) -> Result<JoinEngine<'_>> {
        let (first, second) = self.pair()?;
        Ok(JoinEngine::new(first.side(), second.side()))
    }

    pub fn clear(&mut self, slot: Slot) {
        *self.slot_mut(slot) = None;
    }
}

fn not_selected(slot: Slot) -> QualityError {
    QualityError::QueryBuild(format!("No {} table selected", slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{int, text, FakeConnector};
    use crate::core::value::SqlValue;
    use crate::dialect::Dialect;

    fn push_table(fake: &FakeConnector, rows: i64) {
        fake.push_rows(
            &["COLUMN_NAME", "COLUMN_TYPE", "IS_NULLABLE", "L", "P", "S"],
            vec![
                vec![text("id"), text("int(11)"), text("NO"), SqlValue::Null, int(10), int(0)],
                vec![text("name"), text("varchar(20)"), text("YES"), int(20), SqlValue::Null, SqlValue::Null],
            ],
        );
        fake.push_rows(&["COLUMN_NAME"], vec![vec![text("id")]]);
        fake.push_rows(&["COUNT(*)"], vec![vec![int(rows)]]);
    }

    #[tokio::test]
    async fn test_select_and_refresh() {
        let fake = Arc::new(FakeConnector::new(Dialect::MariaDb));
        let mut session = Session::new();

        push_table(&fake, 3);
        session
            .select_table(Slot::First, fake.clone(), "kurse")
            .await
            .unwrap();
        assert_eq!(session.table(Slot::First).unwrap().schema.row_count, 3);

        push_table(&fake, 5);
        session.refresh(Slot::First).await.unwrap();
        assert_eq!(session.table(Slot::First).unwrap().schema.row_count, 5);
    }

    #[tokio::test]
    async fn test_pair_requires_both_tables() {
        let fake = Arc::new(FakeConnector::new(Dialect::MariaDb));
        let mut session = Session::new();
        push_table(&fake, 1);
        session
            .select_table(Slot::First, fake.clone(), "kurse")
            .await
            .unwrap();

        assert!(matches!(session.pair(), Err(QualityError::QueryBuild(_))));
        assert!(session.join_engine().is_err());

        push_table(&fake, 1);
        session
            .select_table(Slot::Second, fake.clone(), "kurse")
            .await
            .unwrap();
        assert!(session.join_engine().unwrap().is_same_server());

        session.clear(Slot::First);
        assert!(session.table(Slot::First).is_err());
        assert!(matches!(
            session.refresh(Slot::First).await,
            Err(QualityError::QueryBuild(_))
        ));
    }
}
